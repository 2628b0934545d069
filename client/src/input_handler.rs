// Terminal commands, everything else is sent as chat text
const CMD_QUIT: &str = "/quit";
const CMD_USERS: &str = "/users";

pub const LINES_MAX_LEN: usize = 4096;

pub const GREETINGS: &str = "$ Welcome to chat! \n$ Commands: /quit, /users";

#[derive(Debug, PartialEq, Eq)]
pub enum Input {
    Message(String),
    Users,
    Quit,
    Noop,
}

pub struct InputHandler;

impl InputHandler {
    pub fn parse_input(line: Option<String>) -> Input {
        let Some(line) = line else { return Input::Quit };

        match line.trim() {
            CMD_QUIT => Input::Quit,
            CMD_USERS => Input::Users,
            "" => Input::Noop,
            _ => Input::Message(line.trim_end_matches(['\r', '\n']).to_owned()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_and_text() {
        assert_eq!(InputHandler::parse_input(Some("/quit".into())), Input::Quit);
        assert_eq!(InputHandler::parse_input(Some(" /users ".into())), Input::Users);
        assert_eq!(InputHandler::parse_input(Some("   ".into())), Input::Noop);
        assert_eq!(
            InputHandler::parse_input(Some("  hello there".into())),
            Input::Message("  hello there".into())
        );
    }

    #[test]
    fn other_slash_text_is_chat() {
        assert_eq!(InputHandler::parse_input(Some("/quitter".into())), Input::Message("/quitter".into()));
        assert_eq!(InputHandler::parse_input(Some("\\quit".into())), Input::Message("\\quit".into()));
    }

    #[test]
    fn end_of_input_quits() {
        assert_eq!(InputHandler::parse_input(None), Input::Quit);
    }
}
