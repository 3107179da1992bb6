pub mod driver;
pub mod error;
pub mod geometry;
pub mod report;
pub mod runner;
pub mod utils;

// Re-export common items
pub use driver::list_devices;
pub use driver::selector::{Attribute, Selector};
pub use driver::template::{Template, TemplateLibrary, TargetPos};
pub use driver::ui_tree::{UiNode, UiTreeSnapshot};
pub use error::{LocateError, Result};
pub use geometry::{DeviceProfile, NormPoint, Point, Rect, Resolution};
pub use runner::{Action, ScrollDirection, Session, Target};
pub use utils::config::{Settings, SpeedProfile};
