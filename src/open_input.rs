use crate::errors::{ParseOutputError, Result};
use flate2::read::MultiGzDecoder;
use log::debug;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// Open an input table, decompressing on the fly when the name ends in `.gz`.
pub fn open_input(path: &Path) -> Result<Box<dyn Read + Send>> {
    let file = File::open(path).map_err(|e| ParseOutputError::io(path, e))?;
    debug!("File {} opened successfully", path.display());

    let is_gzipped = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("gz"))
        .unwrap_or(false);

    if is_gzipped {
        // Multi-member gzip, same as bgzip output
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Tab-separated reader configured the same way for every input table.
pub fn tsv_reader_builder(has_headers: bool) -> csv::ReaderBuilder {
    let mut builder = csv::ReaderBuilder::new();
    builder
        .delimiter(b'\t')
        .has_headers(has_headers)
        .quoting(false)
        .comment(Some(b'#'))
        .flexible(false);
    builder
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_open_plain_and_gzipped_inputs() {
        let dir = tempdir().unwrap();

        let plain = dir.path().join("table.tsv");
        std::fs::write(&plain, "a\tb\n1\t2\n").unwrap();

        let gzipped = dir.path().join("table.tsv.gz");
        let mut encoder = GzEncoder::new(File::create(&gzipped).unwrap(), Compression::default());
        encoder.write_all(b"a\tb\n1\t2\n").unwrap();
        encoder.finish().unwrap();

        for path in [&plain, &gzipped] {
            let mut content = String::new();
            open_input(path).unwrap().read_to_string(&mut content).unwrap();
            assert_eq!(content, "a\tb\n1\t2\n");
        }
    }

    #[test]
    fn test_open_missing_file_reports_path() {
        let err = match open_input(Path::new("/no/such/dir/input.tsv")) {
            Err(e) => e,
            Ok(_) => panic!("missing file should not open"),
        };
        assert!(matches!(err, ParseOutputError::Io { .. }));
        assert!(err.to_string().contains("/no/such/dir/input.tsv"));
    }
}
