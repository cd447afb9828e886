use std::time::Duration;
use tracing::trace;

use crate::domain::{Message, TEConfig, TEError};
use crate::model::Model;
use ratatui::crossterm::event::{self, Event, KeyCode, KeyModifiers};

pub struct Controller {
    event_poll_time: u64,
}

impl Controller {
    pub fn new(cfg: &TEConfig) -> Self {
        Self {
            event_poll_time: cfg.event_poll_time,
        }
    }

    pub fn handle_event(&self, model: &Model) -> Result<Option<Message>, TEError> {
        if event::poll(Duration::from_millis(self.event_poll_time))? {
            return Ok(match event::read()? {
                Event::Key(key) if key.kind == event::KeyEventKind::Press => {
                    if model.raw_keyevents() {
                        Some(Message::RawKey(key))
                    } else {
                        self.handle_key(key)
                    }
                }
                Event::Resize(width, height) => {
                    Some(Message::Resize(width as usize, height as usize))
                }
                _ => None,
            });
        }
        Ok(None)
    }

    fn handle_key(&self, key: event::KeyEvent) -> Option<Message> {
        let message = match (key.code, key.modifiers) {
            (KeyCode::Char('c'), KeyModifiers::CONTROL) => Some(Message::Quit),
            (KeyCode::Char('q'), _) => Some(Message::Quit),
            (KeyCode::Char('j'), _) | (KeyCode::Down, _) => Some(Message::MoveDown),
            (KeyCode::Char('k'), _) | (KeyCode::Up, _) => Some(Message::MoveUp),
            (KeyCode::Char('h'), _) | (KeyCode::Left, _) => Some(Message::MoveLeft),
            (KeyCode::Char('l'), _) | (KeyCode::Right, _) => Some(Message::MoveRight),
            (KeyCode::PageDown, _) => Some(Message::MovePageDown),
            (KeyCode::PageUp, _) => Some(Message::MovePageUp),
            (KeyCode::Char('g'), _) | (KeyCode::Home, _) => Some(Message::MoveBeginning),
            (KeyCode::Char('G'), _) | (KeyCode::End, _) => Some(Message::MoveEnd),
            (KeyCode::Char('0'), _) => Some(Message::MoveToFirstColumn),
            (KeyCode::Char('$'), _) => Some(Message::MoveToLastColumn),
            (KeyCode::Char('?'), _) => Some(Message::Help),
            (KeyCode::Esc, _) => Some(Message::Exit),
            (KeyCode::Char('/'), _) => Some(Message::Search),
            (KeyCode::Char('f'), _) => Some(Message::Filter),
            (KeyCode::Enter, _) | (KeyCode::Char('e'), _) => Some(Message::EditCell),
            (KeyCode::Char(' '), _) => Some(Message::ToggleSelection),
            (KeyCode::Char('a'), _) => Some(Message::SelectAll),
            (KeyCode::Char('A'), _) => Some(Message::ClearSelection),
            (KeyCode::Char('o'), _) => Some(Message::AddRow),
            (KeyCode::Char('d'), _) | (KeyCode::Delete, _) => Some(Message::DeleteSelected),
            (KeyCode::Char('s'), _) => Some(Message::Export),
            (KeyCode::Char('['), _) => Some(Message::SortAscending),
            (KeyCode::Char(']'), _) => Some(Message::SortDescending),
            (KeyCode::Char('<'), _) => Some(Message::NarrowColumn),
            (KeyCode::Char('>'), _) => Some(Message::WidenColumn),
            (KeyCode::Char('c'), _) => Some(Message::ToggleColumnState),
            (KeyCode::Char('C'), _) => Some(Message::ToggleExpandColumnState),
            (KeyCode::Char('y'), _) => Some(Message::CopyCell),
            (KeyCode::Char('Y'), _) => Some(Message::CopyRows),
            (KeyCode::Char('D'), _) => Some(Message::LoadDemo),
            (KeyCode::Char('O'), _) => Some(Message::OpenFile),
            _ => None,
        };
        trace!("Mapped: {key:?} => {message:?}");
        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratatui::crossterm::event::KeyEvent;

    fn map(code: KeyCode) -> Option<Message> {
        Controller::new(&TEConfig::default()).handle_key(KeyEvent::new(code, KeyModifiers::NONE))
    }

    #[test]
    fn maps_navigation_keys() {
        assert_eq!(map(KeyCode::Char('j')), Some(Message::MoveDown));
        assert_eq!(map(KeyCode::Down), Some(Message::MoveDown));
        assert_eq!(map(KeyCode::Char('h')), Some(Message::MoveLeft));
        assert_eq!(map(KeyCode::Char('G')), Some(Message::MoveEnd));
        assert_eq!(map(KeyCode::Char('$')), Some(Message::MoveToLastColumn));
    }

    #[test]
    fn maps_editing_keys() {
        assert_eq!(map(KeyCode::Enter), Some(Message::EditCell));
        assert_eq!(map(KeyCode::Char(' ')), Some(Message::ToggleSelection));
        assert_eq!(map(KeyCode::Char('o')), Some(Message::AddRow));
        assert_eq!(map(KeyCode::Char('d')), Some(Message::DeleteSelected));
        assert_eq!(map(KeyCode::Char('s')), Some(Message::Export));
        assert_eq!(map(KeyCode::Char('D')), Some(Message::LoadDemo));
    }

    #[test]
    fn ctrl_c_quits() {
        let controller = Controller::new(&TEConfig::default());
        let key = KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL);
        assert_eq!(controller.handle_key(key), Some(Message::Quit));
        assert_eq!(map(KeyCode::Char('c')), Some(Message::ToggleColumnState));
    }

    #[test]
    fn unknown_keys_are_ignored() {
        assert_eq!(map(KeyCode::Char('x')), None);
        assert_eq!(map(KeyCode::F(5)), None);
    }
}
