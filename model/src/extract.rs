use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::Record;

/// Writes a trip's rows back out, one CSV record per line, into `dir/filename`. Field values are
/// kept as read, but quoting and line endings are normalized. Returns the path written. An
/// existing file with the same name is replaced.
pub fn write_extract(dir: &Path, filename: &str, records: &[Record]) -> Result<PathBuf> {
    fs_err::create_dir_all(dir)?;
    let path = dir.join(filename);
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_writer(fs_err::File::create(&path)?);
    for rec in records {
        writer.write_byte_record(&rec.raw)?;
    }
    writer.flush()?;
    Ok(path)
}
