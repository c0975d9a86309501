//! Application state as an explicit struct plus a pure reducer.
//!
//! All mutation flows through [`reduce`] on the controller's thread, so the
//! state machine is testable without any rendering or I/O attached. `Dead`
//! is terminal: once the self-destruct sequence completes no event changes
//! anything again.

use serde::Serialize;

use crate::protocol::Citation;

/// The avatar's affordance state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BotMood {
    Idle,
    Listening,
    Thinking,
    Speaking,
    Destructing,
    Dead,
}

/// What the bot knows about its operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserData {
    pub name: String,
    pub smiles: u32,
    pub scans: u32,
}

impl Default for UserData {
    fn default() -> Self {
        Self {
            name: "Human".to_string(),
            smiles: 0,
            scans: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AppState {
    pub mood: BotMood,
    pub status: String,
    pub operator: UserData,
    pub citations: Vec<Citation>,
    pub thought: Option<String>,
    pub last_heard: Option<String>,
    pub live_active: bool,
    pub recording: bool,
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            mood: BotMood::Idle,
            status: "Awaiting your failure...".to_string(),
            operator: UserData::default(),
            citations: Vec::new(),
            thought: None,
            last_heard: None,
            live_active: false,
            recording: false,
        }
    }
}

#[derive(Debug, Clone)]
pub enum StateEvent {
    Mood(BotMood),
    Status(String),
    /// New reasoning trace; also clears stale citations from earlier queries.
    Thought(Option<String>),
    Citations(Vec<Citation>),
    Heard(String),
    OperatorIdentified(String),
    SmileFaked,
    Recording(bool),
    LiveActive(bool),
    DestructInitiated,
    Destructed,
}

/// Apply one event. Pure bookkeeping, no I/O.
pub fn reduce(state: &mut AppState, event: StateEvent) {
    if state.mood == BotMood::Dead {
        return;
    }
    // Destruction is irreversible; only the narration line and completion
    // get through.
    if state.mood == BotMood::Destructing
        && !matches!(event, StateEvent::Destructed | StateEvent::Status(_))
    {
        return;
    }

    match event {
        StateEvent::Mood(mood) => state.mood = mood,
        StateEvent::Status(status) => state.status = status,
        StateEvent::Thought(thought) => {
            state.thought = thought;
            state.citations.clear();
        }
        StateEvent::Citations(citations) => state.citations = citations,
        StateEvent::Heard(text) => state.last_heard = Some(text),
        StateEvent::OperatorIdentified(name) => {
            state.operator.name = name;
            state.operator.scans += 1;
        }
        StateEvent::SmileFaked => state.operator.smiles += 1,
        StateEvent::Recording(on) => state.recording = on,
        StateEvent::LiveActive(on) => state.live_active = on,
        StateEvent::DestructInitiated => state.mood = BotMood::Destructing,
        StateEvent::Destructed => state.mood = BotMood::Dead,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_idle_with_default_operator() {
        let state = AppState::default();
        assert_eq!(state.mood, BotMood::Idle);
        assert_eq!(state.operator.name, "Human");
        assert!(!state.live_active);
    }

    #[test]
    fn mood_and_status_updates() {
        let mut state = AppState::default();
        reduce(&mut state, StateEvent::Mood(BotMood::Thinking));
        reduce(&mut state, StateEvent::Status("Ruminating...".into()));
        assert_eq!(state.mood, BotMood::Thinking);
        assert_eq!(state.status, "Ruminating...");
    }

    #[test]
    fn scan_updates_name_and_count() {
        let mut state = AppState::default();
        reduce(&mut state, StateEvent::OperatorIdentified("Gremlin".into()));
        reduce(&mut state, StateEvent::OperatorIdentified("Spud".into()));
        assert_eq!(state.operator.name, "Spud");
        assert_eq!(state.operator.scans, 2);
    }

    #[test]
    fn new_thought_clears_stale_citations() {
        let mut state = AppState::default();
        reduce(
            &mut state,
            StateEvent::Citations(vec![Citation {
                uri: "https://a.example".into(),
                title: None,
            }]),
        );
        reduce(&mut state, StateEvent::Thought(Some("hm".into())));
        assert!(state.citations.is_empty());
        assert_eq!(state.thought.as_deref(), Some("hm"));
    }

    #[test]
    fn destructing_blocks_everything_but_completion() {
        let mut state = AppState::default();
        reduce(&mut state, StateEvent::DestructInitiated);
        assert_eq!(state.mood, BotMood::Destructing);

        reduce(&mut state, StateEvent::Mood(BotMood::Idle));
        reduce(&mut state, StateEvent::SmileFaked);
        assert_eq!(state.mood, BotMood::Destructing);
        assert_eq!(state.operator.smiles, 0);

        // The termination line itself still renders.
        reduce(&mut state, StateEvent::Status("Initiating self-termination.".into()));
        assert_eq!(state.status, "Initiating self-termination.");

        reduce(&mut state, StateEvent::Destructed);
        assert_eq!(state.mood, BotMood::Dead);
    }

    #[test]
    fn dead_is_terminal() {
        let mut state = AppState::default();
        reduce(&mut state, StateEvent::DestructInitiated);
        reduce(&mut state, StateEvent::Destructed);

        reduce(&mut state, StateEvent::Mood(BotMood::Idle));
        reduce(&mut state, StateEvent::Status("reboot?".into()));
        assert_eq!(state.mood, BotMood::Dead);
        assert_ne!(state.status, "reboot?");
    }
}
