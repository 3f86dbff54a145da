//! CSV event-table export.
//!
//! Produces a time-aligned table: one column per populated track, one row
//! per tick position where any track has an event, cells holding
//! `offset: event` text. Rows use the parse-time tick positions (loops are
//! not unrolled).

use std::io::Write;

use crate::error::Result;
use crate::seq::{SeqCmd, SequenceFile, TRACK_COUNT};

/// Write the sequence's event table as CSV.
pub fn write_event_table<W: Write>(seq: &SequenceFile, writer: W) -> Result<()> {
    let mut out = csv::Writer::from_writer(writer);

    let tracks: Vec<_> = seq.tracks.iter().filter(|t| !t.is_empty()).collect();
    let mut header = vec!["Ticks".to_string()];
    header.extend(tracks.iter().map(|t| format!("Track {}", t.index)));
    out.write_record(&header)
        .map_err(|e| format!("Failed to write CSV header: {}", e))?;

    // Verbose parses record AddTrack events, so spawned tracks activate
    // when their spawn is reached; otherwise every track starts active and
    // synthetic rests provide the alignment.
    let mut cursor: Vec<Option<usize>> = tracks
        .iter()
        .map(|t| {
            if t.index == 0 || !seq.verbose_events {
                Some(0)
            } else {
                None
            }
        })
        .collect();

    let mut now = 0u32;
    loop {
        let mut next: Option<u32> = None;
        let mut row = vec![now.to_string()];
        let mut unfinished = 0usize;
        let mut activate: Vec<usize> = Vec::new();

        for (column, track) in tracks.iter().enumerate() {
            let Some(index) = cursor[column] else {
                row.push(String::new());
                continue;
            };
            if index >= track.events.len() {
                row.push(String::new());
                continue;
            }
            unfinished += 1;
            let event = &track.events[index];
            if event.timestamp != now {
                row.push(String::new());
                next = Some(next.map_or(event.timestamp, |n| n.min(event.timestamp)));
                continue;
            }

            if event.cmd == SeqCmd::AddTrack as u16 {
                activate.push(event.param1.clamp(0, TRACK_COUNT as i32 - 1) as usize);
            }
            // A track-leading rest only aligns spawned tracks; hide it.
            if index == 0 && event.cmd == SeqCmd::Rest as u16 {
                row.push(String::new());
            } else {
                row.push(format!("{:04x}: {}", event.offset, event));
            }

            let mut advanced = index + 1;
            while advanced < track.events.len()
                && !seq.verbose_events
                && track.events[advanced].cmd == SeqCmd::Rest as u16
            {
                advanced += 1;
            }
            cursor[column] = Some(advanced);
            if let Some(e) = track.events.get(advanced) {
                next = Some(next.map_or(e.timestamp, |n| n.min(e.timestamp)));
            }
        }

        for slot in activate {
            for (column, track) in tracks.iter().enumerate() {
                if track.index == slot && cursor[column].is_none() {
                    cursor[column] = Some(0);
                    if let Some(e) = track.events.first() {
                        next = Some(next.map_or(e.timestamp, |n| n.min(e.timestamp)));
                    }
                }
            }
        }

        out.write_record(&row)
            .map_err(|e| format!("Failed to write CSV row: {}", e))?;

        match next {
            Some(tick) if unfinished > 0 => now = tick,
            _ => break,
        }
    }

    out.flush().map_err(|e| format!("CSV flush failed: {}", e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{Chunk, DATA, RSEQ};
    use crate::context::ParseOptions;
    use crate::stream::ByteView;
    use crate::testutil::{build_container, seq_data_section};

    fn parse(code: &[u8]) -> SequenceFile {
        let bytes = build_container(RSEQ, &[(DATA, seq_data_section(code))]);
        let chunk = Chunk::load_root(&ByteView::from_vec(bytes)).unwrap();
        SequenceFile::parse(chunk, &ParseOptions::default()).unwrap()
    }

    #[test]
    fn test_event_table_aligns_rows_by_tick() {
        let seq = parse(&[
            60, 100, 48, // C4 at tick 0
            62, 100, 48, // D4 at tick 48
            0xFF,
        ]);
        let mut buffer = Vec::new();
        write_event_table(&seq, &mut buffer).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Ticks,Track 0");
        assert!(lines[1].starts_with("0,"));
        assert!(lines[1].contains("C4(100,48)"));
        assert!(lines[2].starts_with("48,"));
        assert!(lines[2].contains("D4(100,48)"));
    }

    #[test]
    fn test_event_table_multiple_tracks() {
        let code = vec![
            0x80, 96, // rest to tick 96
            0x88, 1, 0x00, 0x00, 0x0B, // spawn track 1 at offset 11
            60, 100, 48, 0xFF, // track 0 note at tick 96
            64, 100, 24, 0xFF, // track 1 note (synthetic rest aligns it)
        ];
        let seq = parse(&code);
        let mut buffer = Vec::new();
        write_event_table(&seq, &mut buffer).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Ticks,Track 0,Track 1");
        // Both notes land on the tick-96 row; the synthetic rest is hidden.
        let row96 = lines.iter().find(|l| l.starts_with("96,")).unwrap();
        assert!(row96.contains("C4(100,48)"));
        assert!(row96.contains("E4(100,24)"));
    }
}
