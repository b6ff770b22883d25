//! Applications, their windows and contexts, and the system indicators.

pub mod appinfo;
pub mod directory;
pub mod indicator;
pub mod registry;
pub mod window;

pub use appinfo::{AppInfo, DesktopFiles, NoAppInfo};
pub use directory::{ApplicationDirectory, FocusEvent};
pub use indicator::IndicatorSource;
pub use registry::{ApplicationSource, ContextInfo};
pub use window::{Window, WindowId};
