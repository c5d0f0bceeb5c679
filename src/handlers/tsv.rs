use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::Path;

use csv::{ByteRecord, QuoteStyle, ReaderBuilder, WriterBuilder};

use crate::models::*;

/// Streams the staging artifact (`id<TAB>name`, no header) in fixed-size chunks.
///
/// Every line is one row; quotes carry no meaning. Rows that do not have exactly
/// two UTF-8 columns, or whose id is empty, NULL or does not fit the target column,
/// are counted and skipped instead of failing the read.
pub struct StagingChunks<R: Read> {
    reader: csv::Reader<R>,
    chunk_size: usize,
    record: ByteRecord,
    rows_read: u64,
    malformed: u64,
    exhausted: bool,
}

impl StagingChunks<BufReader<File>> {
    pub fn open(path: &Path, chunk_size: usize) -> Result<Self> {
        let file = File::open(path).map_err(|e| {
            PipelineError::Staging(format!("Cannot open staging artifact {}: {}", path.display(), e))
        })?;
        Ok(Self::from_reader(BufReader::new(file), chunk_size))
    }
}

impl<R: Read> StagingChunks<R> {
    pub fn from_reader(reader: R, chunk_size: usize) -> Self {
        let reader = ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .flexible(true)
            .quoting(false)
            .from_reader(reader);
        Self {
            reader,
            chunk_size: chunk_size.max(1),
            record: ByteRecord::new(),
            rows_read: 0,
            malformed: 0,
            exhausted: false,
        }
    }

    /// Next chunk of well-formed rows, or `None` once the artifact is exhausted.
    ///
    /// A returned chunk may be shorter than `chunk_size` only when it is the last one.
    pub fn next_chunk(&mut self) -> Result<Option<Vec<CandidateRecord>>> {
        if self.exhausted {
            return Ok(None);
        }
        let mut chunk = Vec::with_capacity(self.chunk_size.min(4096));
        while chunk.len() < self.chunk_size {
            if !self.reader.read_byte_record(&mut self.record)? {
                self.exhausted = true;
                break;
            }
            self.rows_read += 1;
            match parse_row(&self.record) {
                Some(candidate) => chunk.push(candidate),
                None => {
                    self.malformed += 1;
                    tracing::debug!(line = self.rows_read, columns = self.record.len(), "Skipping malformed staging row");
                }
            }
        }
        if chunk.is_empty() && self.exhausted {
            return Ok(None);
        }
        Ok(Some(chunk))
    }

    pub fn rows_read(&self) -> u64 {
        self.rows_read
    }

    pub fn malformed(&self) -> u64 {
        self.malformed
    }
}

fn parse_row(record: &ByteRecord) -> Option<CandidateRecord> {
    if record.len() != 2 {
        return None;
    }
    let id = std::str::from_utf8(record.get(0)?).ok()?.trim();
    let name = std::str::from_utf8(record.get(1)?).ok()?;
    // `\N` is how a text-format COPY writes NULL
    if id.is_empty() || id == "\\N" || id.chars().count() > MAX_CUSTOMER_ID_LEN {
        return None;
    }
    Some(CandidateRecord::new(id, name))
}

/// Write candidates in the staging artifact layout, one unquoted line per record.
pub fn write_staging_artifact<W: Write>(out: W, records: &[CandidateRecord]) -> Result<u64> {
    let mut writer = WriterBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .quote_style(QuoteStyle::Never)
        .from_writer(out);
    for record in records {
        let id = staging_safe_text(&record.customer_id);
        let name = staging_safe_text(&record.full_name);
        writer.write_record([id.as_str(), name.as_str()])?;
    }
    writer.flush()?;
    Ok(records.len() as u64)
}

/// Encode target rows for a bulk `COPY ... FROM STDIN (FORMAT csv, DELIMITER E'\t')`.
pub fn encode_target_rows(entries: &[TargetTableEntry]) -> Result<Vec<u8>> {
    let mut writer = WriterBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .from_writer(Vec::new());
    for entry in entries {
        writer.write_record([entry.customer_id.as_str(), entry.ethnicity.as_str(), entry.assigned_on.as_str()])?;
    }
    writer
        .into_inner()
        .map_err(|e| PipelineError::Staging(format!("Failed to encode target rows: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunks_split_at_size() {
        let data = "1\tA\n2\tB\n3\tC\n";
        let mut chunks = StagingChunks::from_reader(data.as_bytes(), 2);
        assert_eq!(chunks.next_chunk().unwrap().unwrap().len(), 2);
        assert_eq!(chunks.next_chunk().unwrap().unwrap().len(), 1);
        assert!(chunks.next_chunk().unwrap().is_none());
        assert_eq!(chunks.rows_read(), 3);
    }

    #[test]
    fn test_malformed_rows_skipped() {
        let mut data: Vec<u8> = b"1\tA\n2\n3\tB\textra\n".to_vec();
        data.extend_from_slice(b"4\t\xff\xfe\n\tNoId\n5\tE\n");
        let mut chunks = StagingChunks::from_reader(data.as_slice(), 100);
        let rows = chunks.next_chunk().unwrap().unwrap();
        let ids: Vec<&str> = rows.iter().map(|r| r.customer_id.as_str()).collect();
        assert_eq!(ids, vec!["1", "5"]);
        assert_eq!(chunks.malformed(), 4);
        assert_eq!(chunks.rows_read(), 6);
    }

    #[test]
    fn test_empty_name_column_is_kept() {
        let mut chunks = StagingChunks::from_reader("1003\t\n".as_bytes(), 10);
        let rows = chunks.next_chunk().unwrap().unwrap();
        assert_eq!(rows, vec![CandidateRecord::new("1003", "")]);
    }

    #[test]
    fn test_artifact_written_then_read() {
        let records = vec![
            CandidateRecord::new("1", "Tab\tInside"),
            CandidateRecord::new("2", "Quote \"Q\" Name"),
            CandidateRecord::new("3", "Line\nBreak"),
        ];
        let mut buf = Vec::new();
        write_staging_artifact(&mut buf, &records).unwrap();
        assert_eq!(buf.iter().filter(|b| **b == b'\n').count(), 3);
        let mut chunks = StagingChunks::from_reader(buf.as_slice(), 10);
        assert_eq!(
            chunks.next_chunk().unwrap().unwrap(),
            vec![
                CandidateRecord::new("1", "Tab Inside"),
                CandidateRecord::new("2", "Quote \"Q\" Name"),
                CandidateRecord::new("3", "Line Break"),
            ]
        );
    }

    #[test]
    fn test_unbalanced_quote_stays_on_its_line() {
        let data = "1\tAna Lima\n2\t\"Broken Name\n3\tBo Chen\n\\N\tNull Id\n4\tHa Le\n";
        let mut chunks = StagingChunks::from_reader(data.as_bytes(), 100);
        let rows = chunks.next_chunk().unwrap().unwrap();
        let ids: Vec<&str> = rows.iter().map(|r| r.customer_id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3", "4"]);
        assert_eq!(rows[1].full_name, "\"Broken Name");
        assert_eq!(chunks.rows_read(), 5);
        assert_eq!(chunks.malformed(), 1);
    }
}
