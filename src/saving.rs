use bincode::{deserialize_from, serialize_into};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::memory::StoreSnapshot;

/// Write a store snapshot as gzip-compressed bincode.
///
/// The snapshot goes to a sibling temporary file first and is renamed over
/// `path`, so a crash mid-write leaves the previous snapshot intact.
pub fn save_snapshot(snapshot: &StoreSnapshot, path: &Path) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let tmp = tempfile::NamedTempFile::new_in(dir)?;
    {
        let encoder = GzEncoder::new(tmp.as_file(), Compression::default());
        let mut writer = std::io::BufWriter::new(encoder);

        serialize_into(&mut writer, snapshot)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;

        let encoder = writer.into_inner().map_err(|e| e.into_error())?;
        let mut file = encoder.finish()?;
        file.flush()?;
    }
    tmp.persist(path).map_err(|e| e.error)?;

    Ok(())
}

pub fn load_snapshot(path: &Path) -> std::io::Result<StoreSnapshot> {
    let file = File::open(path)?;
    let decoder = GzDecoder::new(file);
    let mut reader = std::io::BufReader::new(decoder);

    let snapshot: StoreSnapshot = deserialize_from(&mut reader)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

    Ok(snapshot)
}
