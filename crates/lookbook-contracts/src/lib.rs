pub mod events;
pub mod export;
pub mod history;
pub mod storyboard;
pub mod styles;
