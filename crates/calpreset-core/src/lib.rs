pub mod config;
pub mod dom;
pub mod engine;
pub mod guard;
pub mod identity;
pub mod messages;
pub mod panel;
pub mod presets;
pub mod transition;
pub mod walk;
pub mod walker;

pub use config::EngineConfig;
pub use dom::{Clock, Dom, MutationWatch, NodeId, Overflow};
pub use engine::CalendarEngine;
pub use messages::handle_message;
pub use panel::{PanelController, PendingToggle, SidePanel, ToggleOutcome};
pub use presets::{KeyValueStore, Notice, NoticeLevel, PresetService, PresetStore};
pub use transition::{LoadStatus, PageTransition, TabSnapshot, Tabs, TransitionOutcome};
pub use walk::{WalkOutcome, WalkReport};
