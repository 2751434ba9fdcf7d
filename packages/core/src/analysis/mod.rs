//! Herd analytics.
//!
//! Adaptive vitals anomaly detection and gestation-aware fetal heart-rate
//! assessment, both driven by the animal's recent history in the relational
//! store.

pub mod anomaly;
pub mod pregnancy;
pub mod types;

pub use anomaly::AnomalyDetector;
pub use pregnancy::PregnancyAnalyzer;
pub use types::*;
