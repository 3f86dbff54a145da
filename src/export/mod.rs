//! Export actions: rendered audio to WAV, decoded sequences to CSV.

#[cfg(feature = "export-csv")]
mod csv;
#[cfg(feature = "export-wav")]
mod wav;

#[cfg(feature = "export-csv")]
pub use self::csv::write_event_table;
#[cfg(feature = "export-wav")]
pub use self::wav::{export_to_wav, write_wav_file};
