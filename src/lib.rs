//! Chunked sound-archive parser, sequence interpreter and renderer.
//!
//! Parses a family of chunk-based game-audio archive containers (three
//! archive generations plus their sequence, bank, wave-archive and wave
//! members), decodes DSP-ADPCM and PCM payloads into linear samples, and
//! interprets the embedded sequence bytecode to drive a small sample-
//! synthesis engine.
//!
//! # Features
//! - Recursive, self-describing container loading with magic dispatch and
//!   bounds-checked zero-copy views
//! - Info-table decoding: sounds, banks, players, files and groups
//! - DSP-ADPCM and PCM sample decoding with loop-point conversion
//! - Two-pass sequence interpretation: a build pass decoding bytecode into
//!   timed event lists, and a playback pass replaying them through loops
//! - Key/velocity-split instrument lookup and discrete envelope synthesis
//! - WAV rendering and CSV event-table reports
//!
//! # Crate feature flags
//! - `replayer` (default): sequence playback and sample synthesis (`synth`)
//! - `export-wav`: WAV rendering via the optional `hound` dep (`export`)
//! - `export-csv`: CSV event tables via the optional `csv` dep (`export`)
//!
//! # Quick start
//! ```no_run
//! use sndarc::{ArchiveContext, ByteView, FileHalf, SoundArchive};
//!
//! let ctx = ArchiveContext::new();
//! let data = ByteView::from_vec(std::fs::read("sound.arc").unwrap());
//! let archive = SoundArchive::open(&data).unwrap();
//! for sound in &archive.info().unwrap().sounds {
//!     println!("{}", sound.name);
//! }
//! let seq_bytes = archive.file(0, FileHalf::Main, &ctx).unwrap();
//! ```

#![warn(missing_docs)]

// Domain modules
pub mod archive; // Archive façade & file resolution
pub mod bank; // Instrument banks
pub mod chunk; // Container chunk loading
pub mod codec; // ADPCM/PCM decoding
pub mod context; // Decode context & sample cache
pub mod error; // Error taxonomy
pub mod info; // Info tables
pub mod listing; // Glob matching & listing actions
pub mod seq; // Sequence bytecode interpretation
pub mod stream; // Byte views & endian reads
pub mod wave; // Wave files & wave archives

#[cfg(any(feature = "export-wav", feature = "export-csv"))]
pub mod export; // WAV/CSV export actions
#[cfg(feature = "replayer")]
pub mod synth; // Instrument & envelope synthesis

#[cfg(test)]
pub(crate) mod testutil;

// Public API exports
pub use archive::{FileHalf, SoundArchive};
pub use bank::BankFile;
pub use chunk::{ArchiveKind, Chunk, ChunkKind, DataRef, Magic};
pub use codec::{AdpcmParams, DspAdpcmDecoder, PcmDecoder, SampleData};
pub use context::{ArchiveContext, DiskFs, ParseOptions, VirtualFs};
pub use error::{Result, SndarcError};
pub use info::{InfoTables, SoundType};
pub use listing::{Glob, ListKind, ListResult};
pub use seq::{SequenceFile, TrackCursor};
pub use stream::{ByteView, Endian};
pub use wave::{WaveArchive, WaveFile};

#[cfg(feature = "replayer")]
pub use synth::{EventSink, SequencePlayer, SequenceRenderer};
