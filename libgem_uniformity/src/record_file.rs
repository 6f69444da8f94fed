//! Reading and writing of the binary per-run record files.
//!
//! All values are little endian. Layout:
//!
//! ```text
//! magic "GEMR" | version u16 | n_clusters u64 | n_hits u64
//! n_clusters x (event u64, adc f32, pos_x f32, size u32, time_bin i32, eta i32, phi i32)
//! n_hits x (event u64, adc f32, pos_x f32, strip i32, time_bin i32, eta i32, phi i32)
//! ```
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use super::constants::{RECORD_FILE_MAGIC, RECORD_FILE_VERSION};
use super::error::RecordFileError;
use super::record::{Cluster, Hit};

/// The contents of a record file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordFile {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub clusters: Vec<Cluster>,
    pub hits: Vec<Hit>,
}

impl RecordFile {
    /// Read an entire record file into memory
    pub fn read(path: &Path) -> Result<Self, RecordFileError> {
        if !path.exists() {
            return Err(RecordFileError::BadFilePath(path.to_path_buf()));
        }
        let file = File::open(path)?;
        let size_bytes = file.metadata()?.len();
        let mut reader = BufReader::new(file);

        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if magic != RECORD_FILE_MAGIC {
            return Err(RecordFileError::BadMagic(magic));
        }
        let version = reader.read_u16::<LittleEndian>()?;
        if version != RECORD_FILE_VERSION {
            return Err(RecordFileError::BadVersion(version));
        }
        let n_clusters = reader.read_u64::<LittleEndian>()?;
        let n_hits = reader.read_u64::<LittleEndian>()?;

        let mut clusters = Vec::new();
        for _ in 0..n_clusters {
            clusters.push(read_cluster(&mut reader)?);
        }
        let mut hits = Vec::new();
        for _ in 0..n_hits {
            hits.push(read_hit(&mut reader)?);
        }

        Ok(Self {
            path: path.to_path_buf(),
            size_bytes,
            clusters,
            hits,
        })
    }

    /// Write a set of records to a new file
    pub fn write(path: &Path, clusters: &[Cluster], hits: &[Hit]) -> Result<(), RecordFileError> {
        let mut writer = BufWriter::new(File::create(path)?);
        writer.write_all(&RECORD_FILE_MAGIC)?;
        writer.write_u16::<LittleEndian>(RECORD_FILE_VERSION)?;
        writer.write_u64::<LittleEndian>(clusters.len() as u64)?;
        writer.write_u64::<LittleEndian>(hits.len() as u64)?;
        for cluster in clusters {
            writer.write_u64::<LittleEndian>(cluster.event)?;
            writer.write_f32::<LittleEndian>(cluster.adc)?;
            writer.write_f32::<LittleEndian>(cluster.position_x)?;
            writer.write_u32::<LittleEndian>(cluster.size)?;
            writer.write_i32::<LittleEndian>(cluster.time_bin)?;
            writer.write_i32::<LittleEndian>(cluster.eta)?;
            writer.write_i32::<LittleEndian>(cluster.phi)?;
        }
        for hit in hits {
            writer.write_u64::<LittleEndian>(hit.event)?;
            writer.write_f32::<LittleEndian>(hit.adc)?;
            writer.write_f32::<LittleEndian>(hit.position_x)?;
            writer.write_i32::<LittleEndian>(hit.strip)?;
            writer.write_i32::<LittleEndian>(hit.time_bin)?;
            writer.write_i32::<LittleEndian>(hit.eta)?;
            writer.write_i32::<LittleEndian>(hit.phi)?;
        }
        writer.flush()?;
        Ok(())
    }
}

fn read_cluster<R: Read>(reader: &mut R) -> Result<Cluster, RecordFileError> {
    Ok(Cluster {
        event: reader.read_u64::<LittleEndian>()?,
        adc: reader.read_f32::<LittleEndian>()?,
        position_x: reader.read_f32::<LittleEndian>()?,
        size: reader.read_u32::<LittleEndian>()?,
        time_bin: reader.read_i32::<LittleEndian>()?,
        eta: reader.read_i32::<LittleEndian>()?,
        phi: reader.read_i32::<LittleEndian>()?,
    })
}

fn read_hit<R: Read>(reader: &mut R) -> Result<Hit, RecordFileError> {
    Ok(Hit {
        event: reader.read_u64::<LittleEndian>()?,
        adc: reader.read_f32::<LittleEndian>()?,
        position_x: reader.read_f32::<LittleEndian>()?,
        strip: reader.read_i32::<LittleEndian>()?,
        time_bin: reader.read_i32::<LittleEndian>()?,
        eta: reader.read_i32::<LittleEndian>()?,
        phi: reader.read_i32::<LittleEndian>()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run_0001.gemrec");
        let clusters = vec![Cluster {
            event: 12,
            adc: 450.5,
            position_x: -3.25,
            size: 4,
            time_bin: 7,
            eta: 2,
            phi: 3,
        }];
        let hits = vec![
            Hit {
                event: 12,
                adc: 120.0,
                strip: 17,
                eta: 2,
                phi: 3,
                ..Default::default()
            },
            Hit::default(),
        ];
        RecordFile::write(&path, &clusters, &hits).unwrap();
        let file = RecordFile::read(&path).unwrap();
        assert_eq!(file.clusters, clusters);
        assert_eq!(file.hits, hits);
        assert!(file.size_bytes > 0);
    }

    #[test]
    fn test_bad_magic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.gemrec");
        std::fs::write(&path, b"NOPE\x01\x00").unwrap();
        assert!(matches!(
            RecordFile::read(&path),
            Err(RecordFileError::BadMagic(_))
        ));
    }

    #[test]
    fn test_truncated_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.gemrec");
        let mut bytes = RECORD_FILE_MAGIC.to_vec();
        bytes.extend_from_slice(&RECORD_FILE_VERSION.to_le_bytes());
        bytes.extend_from_slice(&5u64.to_le_bytes());
        bytes.extend_from_slice(&0u64.to_le_bytes());
        std::fs::write(&path, bytes).unwrap();
        assert!(matches!(
            RecordFile::read(&path),
            Err(RecordFileError::IOError(_))
        ));
        assert!(matches!(
            RecordFile::read(&dir.path().join("missing.gemrec")),
            Err(RecordFileError::BadFilePath(_))
        ));
    }
}
