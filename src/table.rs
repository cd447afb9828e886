use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;

use rayon::prelude::*;
use tracing::{debug, trace};

use crate::domain::TEError;

/// Name of the column used to identify rows when deleting.
pub const ID_COLUMN: &str = "id";

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Text(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    fn contains_ignore_case(&self, needle: &str) -> bool {
        match self {
            Value::Null => false,
            Value::Text(s) => s.to_lowercase().contains(needle),
            other => other.to_string().to_lowercase().contains(needle),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Int(i) => write!(f, "{i}"),
            // Whole floats keep a trailing ".0" so they read the same as in the exported csv
            Value::Float(v) if v.is_finite() && v.fract() == 0.0 && v.abs() < 1e15 => {
                write!(f, "{v:.1}")
            }
            Value::Float(v) => write!(f, "{v}"),
            Value::Text(s) => write!(f, "{s}"),
        }
    }
}

/// Kind tag of a column, fixed when the table is loaded.
///
/// Only `Text` columns take part in the global search. `Other` holds
/// columns of a type the editor does not model (booleans, dates, ...) as
/// text without treating them as searchable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Integer,
    Float,
    Text,
    Null,
    Other,
}

impl ColumnKind {
    pub fn is_textual(&self) -> bool {
        matches!(self, ColumnKind::Text)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, ColumnKind::Integer | ColumnKind::Float)
    }

    // Kind a column ends up with after `input` is written into it.
    fn unify(&self, input: &str) -> ColumnKind {
        if input.is_empty() {
            return *self;
        }
        let trimmed = input.trim();
        let is_int = trimmed.parse::<i64>().is_ok();
        let is_float = trimmed.parse::<f64>().is_ok();
        match self {
            ColumnKind::Integer if is_int => ColumnKind::Integer,
            ColumnKind::Integer | ColumnKind::Float if is_float => ColumnKind::Float,
            ColumnKind::Integer | ColumnKind::Float => ColumnKind::Text,
            ColumnKind::Null if is_int => ColumnKind::Integer,
            ColumnKind::Null if is_float => ColumnKind::Float,
            ColumnKind::Null => ColumnKind::Text,
            ColumnKind::Text | ColumnKind::Other => *self,
        }
    }

    fn value_for(&self, input: &str) -> Value {
        if input.is_empty() {
            return Value::Null;
        }
        let trimmed = input.trim();
        match self {
            ColumnKind::Integer => trimmed
                .parse::<i64>()
                .map(Value::Int)
                .unwrap_or_else(|_| Value::Text(input.to_string())),
            ColumnKind::Float => trimmed
                .parse::<f64>()
                .map(Value::Float)
                .unwrap_or_else(|_| Value::Text(input.to_string())),
            ColumnKind::Text | ColumnKind::Other | ColumnKind::Null => {
                Value::Text(input.to_string())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub kind: ColumnKind,
    pub values: Vec<Value>,
}

impl Column {
    pub fn new(name: impl Into<String>, kind: ColumnKind, values: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            kind,
            values,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Widest rendering of the header or any value, in characters.
    pub fn max_width(&self) -> usize {
        self.values
            .par_iter()
            .map(|v| match v {
                Value::Null => 1,
                Value::Text(s) => s.chars().count(),
                other => other.to_string().len(),
            })
            .max()
            .unwrap_or(0)
            .max(self.name.chars().count())
    }

    fn converted(&self, kind: ColumnKind) -> Column {
        let values = self
            .values
            .iter()
            .map(|v| match (kind, v) {
                (_, Value::Null) => Value::Null,
                (ColumnKind::Float, Value::Int(i)) => Value::Float(*i as f64),
                (ColumnKind::Text | ColumnKind::Other, Value::Int(_) | Value::Float(_)) => {
                    Value::Text(v.to_string())
                }
                _ => v.clone(),
            })
            .collect();
        debug!("Column \"{}\" changes kind {:?} -> {:?}", self.name, self.kind, kind);
        Column::new(self.name.clone(), kind, values)
    }

    fn retain_rows(&self, keep: &[bool]) -> Column {
        let values = self
            .values
            .iter()
            .zip(keep)
            .filter(|(_, k)| **k)
            .map(|(v, _)| v.clone())
            .collect();
        Column::new(self.name.clone(), self.kind, values)
    }
}

/// The in-memory table of an edit session.
///
/// Stored column-major. All columns always have the same length. The
/// mutating operations never touch `self`, they return the next table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: Vec<Column>,
}

impl Table {
    pub fn new(columns: Vec<Column>) -> Result<Self, TEError> {
        if let Some(first) = columns.first()
            && let Some(bad) = columns.iter().find(|c| c.len() != first.len())
        {
            return Err(TEError::LoadingFailed(format!(
                "Column \"{}\" has {} rows, expected {}",
                bad.name,
                bad.len(),
                first.len()
            )));
        }
        Ok(Self { columns })
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, idx: usize) -> Option<&Column> {
        self.columns.get(idx)
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn nrows(&self) -> usize {
        self.columns.first().map(|c| c.len()).unwrap_or(0)
    }

    pub fn ncols(&self) -> usize {
        self.columns.len()
    }

    pub fn cell(&self, row: usize, col: usize) -> Option<&Value> {
        self.columns.get(col).and_then(|c| c.values.get(row))
    }

    #[cfg(test)]
    pub fn row(&self, row: usize) -> Vec<&Value> {
        self.columns
            .iter()
            .filter_map(|c| c.values.get(row))
            .collect()
    }

    /// Rows where any text column contains `query`, ignoring case.
    ///
    /// An empty query keeps every row. Result is in table order.
    pub fn search(&self, query: &str) -> Vec<usize> {
        if query.is_empty() {
            return (0..self.nrows()).collect();
        }
        let needle = query.to_lowercase();
        let textual: Vec<&Column> = self
            .columns
            .iter()
            .filter(|c| c.kind.is_textual())
            .collect();
        trace!("Searching {} text columns for \"{}\"", textual.len(), needle);

        (0..self.nrows())
            .into_par_iter()
            .filter(|&ridx| {
                textual
                    .iter()
                    .any(|c| c.values[ridx].contains_ignore_case(&needle))
            })
            .collect()
    }

    /// Subset of `rows` whose value in column `col` contains `term`, ignoring case.
    pub fn filter_column(&self, col: usize, term: &str, rows: &[usize]) -> Vec<usize> {
        let Some(column) = self.columns.get(col) else {
            return rows.to_vec();
        };
        let needle = term.to_lowercase();
        rows.par_iter()
            .copied()
            .filter(|&ridx| column.values[ridx].contains_ignore_case(&needle))
            .collect()
    }

    /// `rows` reordered by the values of column `col`. Nulls always go last.
    pub fn sorted(&self, col: usize, ascending: bool, rows: &[usize]) -> Vec<usize> {
        let mut ordered = rows.to_vec();
        let Some(column) = self.columns.get(col) else {
            return ordered;
        };
        ordered.sort_by(|&a, &b| {
            let (va, vb) = (&column.values[a], &column.values[b]);
            match (va.is_null(), vb.is_null()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Greater,
                (false, true) => Ordering::Less,
                (false, false) => {
                    let ord = Self::compare_values(va, vb);
                    if ascending { ord } else { ord.reverse() }
                }
            }
        });
        ordered
    }

    fn compare_values(a: &Value, b: &Value) -> Ordering {
        match (a, b) {
            (Value::Int(x), Value::Int(y)) => x.cmp(y),
            (Value::Text(x), Value::Text(y)) => x.cmp(y),
            _ => match (a.as_float(), b.as_float()) {
                (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
                _ => a.to_string().cmp(&b.to_string()),
            },
        }
    }

    /// The table with one all-null row appended.
    pub fn with_blank_row(&self) -> Table {
        let columns = self
            .columns
            .iter()
            .map(|c| {
                let mut values = Vec::with_capacity(c.len() + 1);
                values.extend_from_slice(&c.values);
                values.push(Value::Null);
                Column::new(c.name.clone(), c.kind, values)
            })
            .collect();
        Table { columns }
    }

    pub fn id_column(&self) -> Option<usize> {
        self.column_index(ID_COLUMN)
    }

    /// Distinct non-null `id` values of `rows`, or None without an `id` column.
    pub fn id_keys(&self, rows: &[usize]) -> Option<HashSet<String>> {
        let column = &self.columns[self.id_column()?];
        Some(
            rows.iter()
                .filter_map(|&r| column.values.get(r))
                .filter_map(|v| v.as_text())
                .collect(),
        )
    }

    /// The table without every row whose `id` is in `ids`.
    pub fn without_ids(&self, ids: &HashSet<String>) -> Table {
        let Some(idx) = self.id_column() else {
            return self.clone();
        };
        let keep: Vec<bool> = self.columns[idx]
            .values
            .iter()
            .map(|v| v.as_text().is_none_or(|key| !ids.contains(&key)))
            .collect();
        let columns = self.columns.iter().map(|c| c.retain_rows(&keep)).collect();
        Table { columns }
    }

    /// The table with cell (`row`, `col`) set from user input.
    ///
    /// Input is not validated against the column: text that does not fit
    /// changes the kind of the whole column. Empty input sets null.
    pub fn with_cell(&self, row: usize, col: usize, input: &str) -> Result<Table, TEError> {
        let column = self
            .columns
            .get(col)
            .filter(|c| row < c.len())
            .ok_or(TEError::InvalidCell(row, col))?;

        let kind = column.kind.unify(input);
        let mut next = self.clone();
        let target = &mut next.columns[col];
        if target.kind != kind {
            *target = target.converted(kind);
        }
        target.values[row] = kind.value_for(input);
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn people() -> Table {
        Table::new(vec![
            Column::new(
                "id",
                ColumnKind::Integer,
                (1..=5).map(Value::Int).collect(),
            ),
            Column::new(
                "name",
                ColumnKind::Text,
                vec![
                    Value::Text("Alice".into()),
                    Value::Text("bob".into()),
                    Value::Null,
                    Value::Text("ALINA".into()),
                    Value::Text("Carl".into()),
                ],
            ),
            Column::new(
                "city",
                ColumnKind::Text,
                vec![
                    Value::Text("Vienna".into()),
                    Value::Text("Linz".into()),
                    Value::Text("Graz".into()),
                    Value::Null,
                    Value::Text("Salzburg".into()),
                ],
            ),
            Column::new(
                "score",
                ColumnKind::Float,
                vec![
                    Value::Float(1.5),
                    Value::Null,
                    Value::Float(-2.0),
                    Value::Float(10.0),
                    Value::Float(3.25),
                ],
            ),
        ])
        .unwrap()
    }

    #[test]
    fn rejects_ragged_columns() {
        let result = Table::new(vec![
            Column::new("a", ColumnKind::Integer, vec![Value::Int(1)]),
            Column::new("b", ColumnKind::Integer, vec![]),
        ]);
        assert!(matches!(result, Err(TEError::LoadingFailed(_))));
    }

    #[test]
    fn empty_query_keeps_all_rows() {
        let table = people();
        assert_eq!(table.search(""), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn search_ignores_case_and_checks_all_text_columns() {
        let table = people();
        // "ali" hits Alice and ALINA, "li" additionally matches Linz in city.
        assert_eq!(table.search("ali"), vec![0, 3]);
        assert_eq!(table.search("LI"), vec![0, 1, 3]);
    }

    #[test]
    fn search_skips_numeric_columns() {
        let table = people();
        assert!(table.search("1.5").is_empty());
        assert!(table.search("3").is_empty());
    }

    #[test]
    fn search_result_matches_exactly_the_matching_rows() {
        let table = people();
        for query in ["a", "z", "graz", "bob", "x", "N"] {
            let found = table.search(query);
            let needle = query.to_lowercase();
            for ridx in 0..table.nrows() {
                let matches = table
                    .columns()
                    .iter()
                    .filter(|c| c.kind.is_textual())
                    .any(|c| match &c.values[ridx] {
                        Value::Text(s) => s.to_lowercase().contains(&needle),
                        _ => false,
                    });
                assert_eq!(found.contains(&ridx), matches, "query {query}, row {ridx}");
            }
        }
    }

    #[test]
    fn blank_row_is_appended_with_nulls() {
        let table = people();
        let next = table.with_blank_row();
        assert_eq!(next.nrows(), table.nrows() + 1);
        assert!(next.row(table.nrows()).iter().all(|v| v.is_null()));
        for ridx in 0..table.nrows() {
            assert_eq!(next.row(ridx), table.row(ridx));
        }
        // The source table is untouched
        assert_eq!(table.nrows(), 5);
    }

    #[test]
    fn deletes_rows_by_id() {
        let table = people();
        let ids = table.id_keys(&[2, 3]).unwrap();
        let next = table.without_ids(&ids);
        assert_eq!(next.nrows(), 3);
        let remaining: Vec<i64> = next.columns()[0]
            .values
            .iter()
            .filter_map(|v| v.as_int())
            .collect();
        assert_eq!(remaining, vec![1, 2, 5]);
        assert_eq!(next.cell(2, 1), Some(&Value::Text("Carl".into())));
    }

    #[test]
    fn deletes_every_row_sharing_an_id() {
        let table = Table::new(vec![
            Column::new(
                "id",
                ColumnKind::Integer,
                vec![Value::Int(1), Value::Int(2), Value::Int(1), Value::Null],
            ),
            Column::new(
                "v",
                ColumnKind::Text,
                ["a", "b", "c", "d"].map(|s| Value::Text(s.into())).to_vec(),
            ),
        ])
        .unwrap();
        let ids = table.id_keys(&[0, 3]).unwrap();
        assert_eq!(ids.len(), 1);
        let next = table.without_ids(&ids);
        assert_eq!(next.nrows(), 2);
        assert_eq!(next.cell(0, 1), Some(&Value::Text("b".into())));
        assert_eq!(next.cell(1, 0), Some(&Value::Null));
    }

    #[test]
    fn no_id_keys_without_id_column() {
        let table = Table::new(vec![Column::new(
            "name",
            ColumnKind::Text,
            vec![Value::Text("x".into())],
        )])
        .unwrap();
        assert!(table.id_keys(&[0]).is_none());
    }

    #[test]
    fn editing_keeps_kind_when_value_fits() {
        let table = people();
        let next = table.with_cell(0, 0, "42").unwrap();
        assert_eq!(next.columns()[0].kind, ColumnKind::Integer);
        assert_eq!(next.cell(0, 0), Some(&Value::Int(42)));
        assert_eq!(table.cell(0, 0), Some(&Value::Int(1)));
    }

    #[test]
    fn editing_promotes_integer_to_float() {
        let next = people().with_cell(1, 0, "2.5").unwrap();
        assert_eq!(next.columns()[0].kind, ColumnKind::Float);
        assert_eq!(next.cell(0, 0), Some(&Value::Float(1.0)));
        assert_eq!(next.cell(1, 0), Some(&Value::Float(2.5)));
    }

    #[test]
    fn editing_text_into_numeric_column_makes_it_text() {
        let next = people().with_cell(0, 3, "n/a").unwrap();
        assert_eq!(next.columns()[3].kind, ColumnKind::Text);
        assert_eq!(next.cell(0, 3), Some(&Value::Text("n/a".into())));
        assert_eq!(next.cell(2, 3), Some(&Value::Text("-2.0".into())));
        assert_eq!(next.cell(1, 3), Some(&Value::Null));
    }

    #[test]
    fn empty_edit_sets_null() {
        let next = people().with_cell(0, 1, "").unwrap();
        assert_eq!(next.cell(0, 1), Some(&Value::Null));
        assert_eq!(next.columns()[1].kind, ColumnKind::Text);
    }

    #[test]
    fn edit_out_of_bounds_fails() {
        let table = people();
        assert!(matches!(
            table.with_cell(5, 0, "1"),
            Err(TEError::InvalidCell(5, 0))
        ));
        assert!(matches!(
            table.with_cell(0, 9, "1"),
            Err(TEError::InvalidCell(0, 9))
        ));
    }

    #[test]
    fn sorts_numbers_numerically_with_nulls_last() {
        let table = people();
        let rows: Vec<usize> = (0..table.nrows()).collect();
        assert_eq!(table.sorted(3, true, &rows), vec![2, 0, 4, 3, 1]);
        assert_eq!(table.sorted(3, false, &rows), vec![3, 4, 0, 2, 1]);
    }

    #[test]
    fn column_filter_restricts_given_rows() {
        let table = people();
        assert_eq!(table.filter_column(2, "z", &[0, 1, 2, 3, 4]), vec![1, 2, 4]);
        assert_eq!(table.filter_column(2, "z", &[4, 2]), vec![4, 2]);
        // Numeric columns are matched on their printed form
        assert_eq!(table.filter_column(3, "10", &[0, 1, 2, 3, 4]), vec![3]);
    }

    #[test]
    fn formats_values_like_the_csv_writer() {
        assert_eq!(Value::Float(2.0).to_string(), "2.0");
        assert_eq!(Value::Float(0.125).to_string(), "0.125");
        assert_eq!(Value::Int(-3).to_string(), "-3");
        assert_eq!(Value::Null.to_string(), "");
    }
}
