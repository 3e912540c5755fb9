pub mod approval;
pub mod bot;
pub mod conversation;
pub mod intent;
pub mod knowledge;
pub mod session;
pub mod usage;
