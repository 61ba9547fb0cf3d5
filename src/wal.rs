use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use bytes::{Buf, BufMut, BytesMut};

use crate::model::Event;

/// Frames larger than this are treated as corruption rather than allocated.
const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Encode one event as `[u32 len][bincode payload][u32 crc32]`, little endian.
fn encode_frame(buf: &mut BytesMut, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    buf.reserve(payload.len() + 8);
    buf.put_u32_le(payload.len() as u32);
    buf.put_slice(&payload);
    buf.put_u32_le(crc32fast::hash(&payload));
    Ok(())
}

/// Pull the next frame off `buf`. `None` on a clean end, a short tail, a bad
/// checksum or an undecodable payload; the log is cut at the first of these.
fn decode_frame(buf: &mut &[u8]) -> Option<Event> {
    if buf.remaining() < 4 {
        return None;
    }
    let len = (&buf[..4]).get_u32_le() as usize;
    if len > MAX_FRAME_LEN || buf.remaining() < 4 + len + 4 {
        return None;
    }
    buf.advance(4);
    let payload = &buf[..len];
    let stored_crc = (&buf[len..len + 4]).get_u32_le();
    if crc32fast::hash(payload) != stored_crc {
        return None;
    }
    let event = bincode::deserialize::<Event>(payload).ok()?;
    buf.advance(len + 4);
    Some(event)
}

/// Append-only write-ahead log of one tenant.
///
/// Events are staged with [`Wal::append_buffered`] and made durable together
/// by [`Wal::flush_sync`] (group commit). Replay stops at the first truncated
/// or corrupt frame, which is what a crash mid-append leaves behind.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    scratch: BytesMut,
    appends_since_compact: u64,
}

impl Wal {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            scratch: BytesMut::with_capacity(512),
            appends_since_compact: 0,
        })
    }

    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Stage an event without syncing.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        self.scratch.clear();
        encode_frame(&mut self.scratch, event)?;
        self.writer.write_all(&self.scratch)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(path: &Path) -> PathBuf {
        path.with_extension("wal.tmp")
    }

    /// Write the compacted log next to the live one and fsync it.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let mut buf = BytesMut::new();
        for event in events {
            encode_frame(&mut buf, event)?;
        }
        let mut file = File::create(Self::tmp_path(path))?;
        file.write_all(&buf)?;
        file.sync_all()
    }

    /// Rename the compacted file over the log and reopen it for appends.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        // Anything still buffered belongs to the old file.
        self.writer.flush()?;
        fs::rename(Self::tmp_path(&self.path), &self.path)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        tracing::info!("compacted WAL {}", self.path.display());
        Ok(())
    }

    #[cfg(test)]
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        Self::write_compact_file(&self.path, events)?;
        self.swap_compact_file()
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Read every intact event from the log. A missing file is an empty log.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        let data = match fs::read(path) {
            Ok(d) => d,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut cursor: &[u8] = &data;
        let mut events = Vec::new();
        while let Some(event) = decode_frame(&mut cursor) {
            events.push(event);
        }
        if cursor.has_remaining() {
            tracing::warn!(
                "discarding {} trailing bytes of {}",
                cursor.remaining(),
                path.display()
            );
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use chrono::NaiveDate;
    use ulid::Ulid;

    fn tmp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("stayd_test_wal");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = fs::remove_file(&path);
        path
    }

    fn created(id: ResourceId) -> Event {
        Event::ResourceCreated {
            id,
            kind: ListingKind::Stay,
            name: Some("Loft".into()),
            capacity: 2,
            pricing: Some(Pricing {
                base_price: 45000,
                cleaning_fee: 5000,
                service_fee: 2500,
            }),
        }
    }

    fn admitted(resource_id: ResourceId, day: u32) -> Event {
        let check_in = NaiveDate::from_ymd_opt(2025, 3, day).unwrap();
        Event::ReservationAdmitted {
            reservation: Reservation {
                id: Ulid::new(),
                resource_id,
                guest_id: 7,
                kind: BookingKind::Stay,
                check_in,
                check_out: check_in.succ_opt().unwrap(),
                nights: 1,
                guests: 1,
                total: 52500,
                note: None,
                created_at: 0,
            },
        }
    }

    #[test]
    fn append_and_replay() {
        let path = tmp_path("append_and_replay.wal");
        let events = vec![created(1), admitted(1, 4)];
        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append(e).unwrap();
            }
        }
        assert_eq!(Wal::replay(&path).unwrap(), events);
    }

    #[test]
    fn replay_drops_truncated_tail() {
        let path = tmp_path("truncation.wal");
        let event = created(1);
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&event).unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[9, 0, 0, 0, 1, 2]).unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), vec![event]);
    }

    #[test]
    fn replay_missing_file_is_empty() {
        let path = tmp_path("nonexistent.wal");
        assert!(Wal::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn replay_stops_at_bad_checksum() {
        let path = tmp_path("corrupt_crc.wal");
        let good = created(1);
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&good).unwrap();
        }
        {
            let payload = bincode::serialize(&Event::ResourceDeleted { id: 1 }).unwrap();
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&0xDEAD_BEEFu32.to_le_bytes()).unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), vec![good]);
    }

    #[test]
    fn replay_rejects_absurd_length() {
        let path = tmp_path("absurd_len.wal");
        fs::write(&path, u32::MAX.to_le_bytes()).unwrap();
        assert!(Wal::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn compact_shrinks_and_keeps_appending() {
        let path = tmp_path("compact.wal");
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&created(1)).unwrap();
            for day in 1..20 {
                let admit = admitted(1, day);
                let Event::ReservationAdmitted { reservation } = &admit else {
                    unreachable!()
                };
                let cancel = Event::ReservationCancelled {
                    id: reservation.id,
                    resource_id: 1,
                };
                wal.append(&admit).unwrap();
                wal.append(&cancel).unwrap();
            }
        }
        let before = fs::metadata(&path).unwrap().len();

        let kept = admitted(1, 25);
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.compact(&[created(1)]).unwrap();
            assert_eq!(wal.appends_since_compact(), 0);
            wal.append(&kept).unwrap();
        }

        let after = fs::metadata(&path).unwrap().len();
        assert!(after < before, "compacted WAL should be smaller: {after} < {before}");
        assert_eq!(Wal::replay(&path).unwrap(), vec![created(1), kept]);
    }

    #[test]
    fn buffered_appends_count_and_flush_together() {
        let path = tmp_path("buffered_flush.wal");
        let events: Vec<Event> = (1..=5).map(created).collect();
        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append_buffered(e).unwrap();
            }
            assert_eq!(wal.appends_since_compact(), 5);
            wal.flush_sync().unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), events);
    }
}
