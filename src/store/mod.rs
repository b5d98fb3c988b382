//! Persistence shared with the host application.

pub mod defaults;
pub mod detections;

pub use defaults::SharedDefaults;
pub use detections::DetectionStore;
