pub mod dose_event;
pub mod enums;
pub mod medicine;
pub mod notification;

pub use dose_event::DoseEvent;
pub use enums::*;
pub use medicine::Medicine;
pub use notification::Notification;
