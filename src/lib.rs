pub mod audio_engine;
pub mod messages;
pub mod slots;
pub mod soundboard;
pub mod store;

#[cfg(feature = "python")]
mod python;

pub use audio_engine::{AudioEngine, EngineConfig, OutputBackend};
pub use soundboard::{Soundboard, SoundboardError};

/// The Python module implemented in Rust.
#[cfg(feature = "python")]
#[pyo3::pymodule]
mod soundboard_audio {
    #[pymodule_export]
    use super::python::PySoundboard;
}
