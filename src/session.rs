use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::domain::TEError;
use crate::loader::{self, Source};
use crate::table::Table;

/// Outcome of an action, shown to the user in the status line.
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    Info(String),
    Success(String),
    Warning(String),
    Error(String),
}

impl Notice {
    pub fn message(&self) -> &str {
        match self {
            Notice::Info(m) | Notice::Success(m) | Notice::Warning(m) | Notice::Error(m) => m,
        }
    }
}

/// User actions on a loaded table.
///
/// Row arguments are positions in the current view, not in the table.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Search(String),
    FilterColumn(usize, String),
    PopFilter,
    Sort(usize, bool),
    EditCell { row: usize, col: usize, input: String },
    ToggleSelection(usize),
    SelectAll,
    ClearSelection,
    AddBlankRow,
    DeleteSelected,
    Export(PathBuf),
}

#[derive(Debug, Clone)]
struct ColumnFilter {
    column: usize,
    term: String,
}

// Everything the view is derived from, besides the table itself.
#[derive(Debug, Clone, Default)]
struct ViewState {
    query: String,
    filters: Vec<ColumnFilter>,
    sort: Option<(usize, bool)>,
}

/// A tabular edit session: one table, the view onto it and the row selection.
///
/// Mutations build the next table from the current one and swap it in, the
/// view is then rebuilt from scratch so it is never stale.
pub struct Session {
    name: String,
    table: Table,
    state: ViewState,
    rows: Vec<usize>, // View row index -> table row index
    selection: BTreeSet<usize>, // Table row indices
    widths: Vec<usize>,
}

impl Session {
    pub fn new(name: impl Into<String>, table: Table) -> Self {
        let mut session = Self {
            name: name.into(),
            table: Table::default(),
            state: ViewState::default(),
            rows: Vec::new(),
            selection: BTreeSet::new(),
            widths: Vec::new(),
        };
        session.commit(table);
        session
    }

    pub fn load(source: &Source) -> Result<Self, TEError> {
        Ok(Self::new(source.name(), loader::load(source)?))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    pub fn view(&self) -> &[usize] {
        &self.rows
    }

    pub fn view_len(&self) -> usize {
        self.rows.len()
    }

    pub fn query(&self) -> &str {
        &self.state.query
    }

    pub fn filter_count(&self) -> usize {
        self.state.filters.len()
    }

    pub fn sort(&self) -> Option<(usize, bool)> {
        self.state.sort
    }

    pub fn table_row(&self, view_row: usize) -> Option<usize> {
        self.rows.get(view_row).copied()
    }

    pub fn is_selected(&self, table_row: usize) -> bool {
        self.selection.contains(&table_row)
    }

    pub fn selection_count(&self) -> usize {
        self.selection.len()
    }

    /// Selected table rows in table order.
    pub fn selected_rows(&self) -> Vec<usize> {
        self.selection.iter().copied().collect()
    }

    /// Widest rendering per column, header included.
    pub fn column_widths(&self) -> &[usize] {
        &self.widths
    }

    pub fn apply(&mut self, action: Action) -> Result<Notice, TEError> {
        trace!("Apply {:?}", action);
        let notice = match action {
            Action::Search(query) => self.search(query),
            Action::FilterColumn(column, term) => self.filter_column(column, term),
            Action::PopFilter => self.pop_filter(),
            Action::Sort(column, ascending) => self.sort_by(column, ascending),
            Action::EditCell { row, col, input } => self.edit_cell(row, col, &input)?,
            Action::ToggleSelection(row) => self.toggle_selection(row),
            Action::SelectAll => {
                self.selection.extend(self.rows.iter().copied());
                self.selection_notice()
            }
            Action::ClearSelection => {
                self.selection.clear();
                self.selection_notice()
            }
            Action::AddBlankRow => self.add_blank_row(),
            Action::DeleteSelected => self.delete_selected(),
            Action::Export(dir) => self.export(&dir)?,
        };
        debug!("{:?}", notice);
        Ok(notice)
    }

    fn commit(&mut self, table: Table) {
        self.table = table;
        self.widths = self.table.columns().iter().map(|c| c.max_width()).collect();
        self.rebuild_view();
    }

    fn rebuild_view(&mut self) {
        let start_time = Instant::now();
        let mut rows = self.table.search(&self.state.query);
        for filter in self.state.filters.iter() {
            rows = self.table.filter_column(filter.column, &filter.term, &rows);
        }
        if let Some((column, ascending)) = self.state.sort {
            rows = self.table.sorted(column, ascending, &rows);
        }
        // Only displayed rows can stay selected
        if !self.selection.is_empty() {
            let visible: BTreeSet<usize> = rows.iter().copied().collect();
            self.selection.retain(|r| visible.contains(r));
        }
        self.rows = rows;
        trace!(
            "View rebuilt: {} of {} rows in {}ms",
            self.rows.len(),
            self.table.nrows(),
            start_time.elapsed().as_millis()
        );
    }

    fn search(&mut self, query: String) -> Notice {
        self.state.query = query;
        self.rebuild_view();
        if self.state.query.is_empty() {
            Notice::Info(format!("Showing all {} rows", self.rows.len()))
        } else {
            Notice::Info(format!(
                "{} of {} rows match \"{}\"",
                self.rows.len(),
                self.table.nrows(),
                self.state.query
            ))
        }
    }

    fn filter_column(&mut self, column: usize, term: String) -> Notice {
        let Some(name) = self.table.column(column).map(|c| c.name.clone()) else {
            return Notice::Warning(format!("No column {column}"));
        };
        if term.is_empty() {
            return Notice::Info("Empty filter ignored".to_string());
        }
        self.state.filters.push(ColumnFilter {
            column,
            term: term.clone(),
        });
        self.rebuild_view();
        Notice::Info(format!(
            "{} rows where {} contains \"{}\"",
            self.rows.len(),
            name,
            term
        ))
    }

    /// Undo the most recent narrowing: column filters first, then the query, then the sort.
    fn pop_filter(&mut self) -> Notice {
        if self.state.filters.pop().is_none() {
            if !self.state.query.is_empty() {
                self.state.query.clear();
            } else if self.state.sort.take().is_some() {
                self.rebuild_view();
                return Notice::Info("Sort cleared".to_string());
            } else {
                return Notice::Info("No filter active".to_string());
            }
        }
        self.rebuild_view();
        Notice::Info(format!("Showing {} rows", self.rows.len()))
    }

    fn sort_by(&mut self, column: usize, ascending: bool) -> Notice {
        let Some(name) = self.table.column(column).map(|c| c.name.clone()) else {
            return Notice::Warning(format!("No column {column}"));
        };
        self.state.sort = Some((column, ascending));
        self.rebuild_view();
        let order = if ascending { "ascending" } else { "descending" };
        Notice::Info(format!("Sorted by {name} {order}"))
    }

    fn edit_cell(&mut self, row: usize, col: usize, input: &str) -> Result<Notice, TEError> {
        let table_row = self.table_row(row).ok_or(TEError::InvalidCell(row, col))?;
        let next = self.table.with_cell(table_row, col, input)?;
        let name = next.column(col).map(|c| c.name.clone()).unwrap_or_default();
        self.commit(next);
        Ok(Notice::Info(format!("Updated {} of row {}", name, table_row + 1)))
    }

    fn toggle_selection(&mut self, row: usize) -> Notice {
        if let Some(table_row) = self.table_row(row)
            && !self.selection.remove(&table_row)
        {
            self.selection.insert(table_row);
        }
        self.selection_notice()
    }

    fn selection_notice(&self) -> Notice {
        Notice::Info(format!("Selected rows: {}", self.selection.len()))
    }

    fn add_blank_row(&mut self) -> Notice {
        let next = self.table.with_blank_row();
        let new_row = next.nrows().saturating_sub(1);
        self.selection.clear();
        self.commit(next);
        info!("Added blank row {}", new_row + 1);
        if self.rows.contains(&new_row) {
            Notice::Success("Added blank row".to_string())
        } else {
            Notice::Info("Added blank row (hidden by the current filter)".to_string())
        }
    }

    fn delete_selected(&mut self) -> Notice {
        if self.selection.is_empty() {
            warn!("Delete requested without selection");
            return Notice::Warning("No rows selected".to_string());
        }
        let Some(ids) = self.table.id_keys(&self.selected_rows()) else {
            warn!("Delete requested on a table without id column");
            return Notice::Warning("No 'id' column found to identify rows".to_string());
        };
        let next = self.table.without_ids(&ids);
        info!(
            "Deleting {} ids removed {} rows",
            ids.len(),
            self.table.nrows() - next.nrows()
        );
        self.selection.clear();
        self.commit(next);
        Notice::Success(format!("Deleted {} rows", ids.len()))
    }

    fn export(&self, dir: &std::path::Path) -> Result<Notice, TEError> {
        let path = loader::export(&self.table, &self.rows, dir)?;
        Ok(Notice::Success(format!(
            "Exported {} rows to {}",
            self.rows.len(),
            path.display()
        )))
    }

    /// Selected rows as csv with header, for the clipboard.
    pub fn selection_csv(&self) -> Result<String, TEError> {
        let rows: Vec<usize> = self
            .rows
            .iter()
            .copied()
            .filter(|r| self.selection.contains(r))
            .collect();
        let bytes = loader::write_csv(&self.table, &rows)?;
        String::from_utf8(bytes).map_err(|e| TEError::LoadingFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Value;
    use std::path::Path;

    const PEOPLE: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/people.csv");
    const NO_ID: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/no_id.csv");

    fn people() -> Session {
        Session::load(&Source::File(PEOPLE.into())).unwrap()
    }

    fn ids(session: &Session) -> Vec<i64> {
        let id = session.table().id_column().unwrap();
        session.table().columns()[id]
            .values
            .iter()
            .filter_map(|v| v.as_int())
            .collect()
    }

    #[test]
    fn new_session_shows_whole_table() {
        let session = people();
        assert_eq!(session.name(), "people.csv");
        assert_eq!(session.view(), &[0, 1, 2, 3, 4]);
        assert_eq!(session.column_widths(), &[2, 5, 8, 5]);
    }

    #[test]
    fn search_narrows_and_empty_query_restores() {
        let mut session = people();
        let notice = session.apply(Action::Search("ALI".into())).unwrap();
        assert_eq!(session.view(), &[0, 3]);
        assert_eq!(notice, Notice::Info("2 of 5 rows match \"ALI\"".into()));

        session.apply(Action::Search(String::new())).unwrap();
        assert_eq!(session.view_len(), 5);
    }

    #[test]
    fn demo_search_counts_substring_matches() {
        let mut session = Session::load(&Source::Demo(200_000)).unwrap();
        assert_eq!(session.view_len(), 200_000);
        session.apply(Action::Search("name_1".into())).unwrap();

        let expected = (1..=200_000)
            .filter(|i| format!("name_{i}").contains("name_1"))
            .count();
        assert_eq!(session.view_len(), expected);
        assert_eq!(session.view_len(), 111_111);
        let table = session.table();
        assert!(session.view().iter().all(|&r| {
            table
                .cell(r, 1)
                .and_then(|v| v.as_text())
                .is_some_and(|name| name.contains("name_1"))
        }));
    }

    #[test]
    fn sort_and_filter_leave_table_order_alone() {
        let mut session = people();
        let before = session.table().clone();
        session.apply(Action::Sort(3, false)).unwrap();
        assert_eq!(session.view(), &[3, 4, 0, 2, 1]);
        session.apply(Action::FilterColumn(2, "z".into())).unwrap();
        assert_eq!(session.view(), &[4, 2, 1]);
        assert_eq!(session.table(), &before);

        session.apply(Action::PopFilter).unwrap();
        assert_eq!(session.view_len(), 5);
    }

    #[test]
    fn pop_filter_clears_query_after_column_filters() {
        let mut session = people();
        session.apply(Action::Search("a".into())).unwrap();
        session.apply(Action::FilterColumn(1, "graz".into())).unwrap();
        assert!(session.view().is_empty());
        session.apply(Action::PopFilter).unwrap();
        assert_eq!(session.filter_count(), 0);
        assert_eq!(session.query(), "a");
        session.apply(Action::PopFilter).unwrap();
        assert_eq!(session.query(), "");
        assert_eq!(
            session.apply(Action::PopFilter).unwrap(),
            Notice::Info("No filter active".into())
        );
    }

    #[test]
    fn pop_filter_clears_sort_last() {
        let mut session = people();
        session.apply(Action::Sort(3, false)).unwrap();
        session.apply(Action::Search("a".into())).unwrap();
        session.apply(Action::PopFilter).unwrap();
        assert_eq!(session.query(), "");
        assert_eq!(session.sort(), Some((3, false)));
        assert_eq!(session.view(), &[3, 4, 0, 2, 1]);

        let notice = session.apply(Action::PopFilter).unwrap();
        assert_eq!(notice, Notice::Info("Sort cleared".into()));
        assert_eq!(session.sort(), None);
        assert_eq!(session.view(), &[0, 1, 2, 3, 4]);
    }

    #[test]
    fn edit_writes_through_the_view() {
        let mut session = people();
        session.apply(Action::Search("carl".into())).unwrap();
        session
            .apply(Action::EditCell {
                row: 0,
                col: 2,
                input: "Innsbruck".into(),
            })
            .unwrap();
        assert_eq!(
            session.table().cell(4, 2),
            Some(&Value::Text("Innsbruck".into()))
        );
        assert!(session
            .apply(Action::EditCell {
                row: 3,
                col: 0,
                input: "1".into()
            })
            .is_err());
    }

    #[test]
    fn edit_that_drops_row_from_view_rebuilds_it() {
        let mut session = people();
        session.apply(Action::Search("carl".into())).unwrap();
        session
            .apply(Action::EditCell {
                row: 0,
                col: 1,
                input: "Dora".into(),
            })
            .unwrap();
        assert!(session.view().is_empty());
    }

    #[test]
    fn add_blank_row_appends_null_row() {
        let mut session = people();
        let notice = session.apply(Action::AddBlankRow).unwrap();
        assert_eq!(notice, Notice::Success("Added blank row".into()));
        assert_eq!(session.table().nrows(), 6);
        assert_eq!(session.view_len(), 6);
        assert!(session.table().row(5).iter().all(|v| v.is_null()));
    }

    #[test]
    fn blank_row_hidden_by_search_is_reported() {
        let mut session = people();
        session.apply(Action::Search("bob".into())).unwrap();
        let notice = session.apply(Action::AddBlankRow).unwrap();
        assert!(matches!(notice, Notice::Info(_)));
        assert_eq!(session.table().nrows(), 6);
        assert_eq!(session.view_len(), 1);
    }

    #[test]
    fn delete_without_selection_warns() {
        let mut session = people();
        let notice = session.apply(Action::DeleteSelected).unwrap();
        assert_eq!(notice, Notice::Warning("No rows selected".into()));
        assert_eq!(session.table().nrows(), 5);
    }

    #[test]
    fn delete_without_id_column_warns() {
        let mut session = Session::load(&Source::File(NO_ID.into())).unwrap();
        session.apply(Action::ToggleSelection(1)).unwrap();
        let notice = session.apply(Action::DeleteSelected).unwrap();
        assert_eq!(
            notice,
            Notice::Warning("No 'id' column found to identify rows".into())
        );
        assert_eq!(session.table().nrows(), 3);
    }

    #[test]
    fn delete_selected_ids() {
        let mut session = Session::load(&Source::Demo(20)).unwrap();
        session.apply(Action::ToggleSelection(2)).unwrap();
        session.apply(Action::ToggleSelection(6)).unwrap();
        assert_eq!(session.selected_rows(), vec![2, 6]);

        let notice = session.apply(Action::DeleteSelected).unwrap();
        assert_eq!(notice, Notice::Success("Deleted 2 rows".into()));
        assert_eq!(session.table().nrows(), 18);
        let remaining = ids(&session);
        assert!(!remaining.contains(&3) && !remaining.contains(&7));
        let mut expected: Vec<i64> = (1..=20).collect();
        expected.retain(|i| *i != 3 && *i != 7);
        assert_eq!(remaining, expected);
        assert_eq!(session.selection_count(), 0);
    }

    #[test]
    fn toggling_twice_deselects() {
        let mut session = people();
        session.apply(Action::ToggleSelection(0)).unwrap();
        session.apply(Action::ToggleSelection(0)).unwrap();
        assert_eq!(session.selection_count(), 0);
    }

    #[test]
    fn selection_is_limited_to_displayed_rows() {
        let mut session = people();
        session.apply(Action::SelectAll).unwrap();
        assert_eq!(session.selection_count(), 5);
        session.apply(Action::Search("linz".into())).unwrap();
        assert_eq!(session.selected_rows(), vec![1]);
        session.apply(Action::ClearSelection).unwrap();
        assert_eq!(session.selection_count(), 0);
    }

    #[test]
    fn export_writes_current_view() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = people();
        session.apply(Action::Search("a".into())).unwrap();
        let notice = session
            .apply(Action::Export(dir.path().to_path_buf()))
            .unwrap();
        assert!(matches!(notice, Notice::Success(_)));

        let written = std::fs::read(dir.path().join("edited_table.csv")).unwrap();
        assert_eq!(
            written,
            loader::write_csv(session.table(), session.view()).unwrap()
        );
        let reloaded = loader::load_csv_bytes(written).unwrap();
        assert_eq!(reloaded.nrows(), session.view_len());
    }

    #[test]
    fn selection_csv_has_header_and_rows() {
        let mut session = people();
        session.apply(Action::ToggleSelection(4)).unwrap();
        session.apply(Action::ToggleSelection(0)).unwrap();
        let csv = session.selection_csv().unwrap();
        assert_eq!(
            csv,
            "id,name,city,score\n1,Alice,Vienna,1.5\n5,Carl,Salzburg,3.25\n"
        );
    }

    #[test]
    fn loading_bad_source_fails() {
        let result = Session::load(&Source::File(Path::new("missing.csv").to_path_buf()));
        assert!(matches!(result, Err(TEError::FileNotFound)));
    }
}
