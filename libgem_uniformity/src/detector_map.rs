// The detector map describes the geometry of the readout: which eta sectors exist, where
// they sit, how wide they are, and how they are split into phi sectors. The phi split can
// either be even (only the number of phi sectors is given) or explicit (an x range per phi
// sector).
use std::fs::File;
use std::io::Read;
use std::path::Path;

use super::detector::Detector;
use super::error::DetectorMapError;

const EVEN_ENTRIES_PER_LINE: usize = 4; //eta, y_pos, width, n_phi
const ENTRIES_PER_PHI_RANGE: usize = 2; //x_low, x_high

/// Load the default map for windows
#[cfg(target_family = "windows")]
fn load_default_map() -> String {
    String::from(include_str!("data\\default_detector_map.csv"))
}

/// Load the default map for macos and linux
#[cfg(target_family = "unix")]
fn load_default_map() -> String {
    String::from(include_str!("data/default_detector_map.csv"))
}

/// Build the detector geometry from a map file.
///
/// If the path is None, we load the default that is bundled with the library. The map is a
/// CSV file with a header line and one row per eta sector: `eta,y_pos,width,n_phi`. A row
/// may be followed by `n_phi` pairs of `x_low,x_high` to give explicit phi sector ranges.
pub fn load_detector_map(path: Option<&Path>) -> Result<Detector, DetectorMapError> {
    let mut contents = String::new();
    if let Some(p) = path {
        let mut file = File::open(p)?;
        file.read_to_string(&mut contents)?;
    } else {
        contents = load_default_map();
    }

    let mut detector = Detector::new();
    let mut lines = contents.lines().enumerate();
    lines.next(); // Skip the header
    for (line_number, line) in lines {
        if line.trim().is_empty() {
            continue;
        }
        let entries: Vec<&str> = line.split_terminator(',').map(|e| e.trim()).collect();
        if entries.len() < EVEN_ENTRIES_PER_LINE {
            return Err(DetectorMapError::BadFileFormat(line_number + 1));
        }

        let eta: i32 = entries[0].parse()?;
        let y_pos: f32 = entries[1].parse()?;
        let width: f32 = entries[2].parse()?;
        let n_phi: usize = entries[3].parse()?;

        let explicit_entries = n_phi
            .checked_mul(ENTRIES_PER_PHI_RANGE)
            .and_then(|n| n.checked_add(EVEN_ENTRIES_PER_LINE))
            .ok_or(DetectorMapError::BadFileFormat(line_number + 1))?;

        if entries.len() == EVEN_ENTRIES_PER_LINE {
            detector.define_eta_sector(eta, y_pos, width, n_phi)?;
        } else if entries.len() == explicit_entries {
            let mut ranges: Vec<(f32, f32)> = Vec::with_capacity(n_phi);
            for pair in entries[EVEN_ENTRIES_PER_LINE..].chunks(ENTRIES_PER_PHI_RANGE) {
                ranges.push((pair[0].parse()?, pair[1].parse()?));
            }
            detector.define_eta_sector_with_phi(eta, y_pos, width, &ranges)?;
        } else {
            return Err(DetectorMapError::BadFileFormat(line_number + 1));
        }
    }

    spdlog::info!(
        "Loaded detector map with {} eta sectors",
        detector.n_eta_sectors()
    );
    Ok(detector)
}

//Unit tests
#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_map() {
        let detector = match load_detector_map(None) {
            Ok(d) => d,
            Err(_) => {
                panic!();
            }
        };
        assert_eq!(detector.n_eta_sectors(), 8);
        for (_, eta) in detector.eta_sectors() {
            assert_eq!(eta.n_phi(), 3);
        }
        let eta = detector.eta_sector(1).unwrap();
        let first = eta.phi_sector(1).unwrap();
        assert!((first.x_low() + 0.5 * eta.width()).abs() < 1e-4);
    }

    #[test]
    fn test_explicit_phi_ranges() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "eta,y_pos,width,n_phi,ranges").unwrap();
        writeln!(file, "1,0.0,10.0,2,-5.0,5.0,-5.0,5.0").unwrap();
        writeln!(file, "2,20.0,12.0,3").unwrap();
        let detector = load_detector_map(Some(file.path())).unwrap();
        assert_eq!(detector.n_eta_sectors(), 2);
        assert_eq!(detector.phi_sector(1, 2).unwrap().x_low(), -5.0);
        assert_eq!(detector.phi_sector(2, 3).unwrap().x_high(), 6.0);
    }

    #[test]
    fn test_bad_map() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "eta,y_pos,width,n_phi").unwrap();
        writeln!(file, "1,0.0,10.0,2,-5.0").unwrap();
        assert!(matches!(
            load_detector_map(Some(file.path())),
            Err(DetectorMapError::BadFileFormat(2))
        ));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "eta,y_pos,width,n_phi").unwrap();
        writeln!(file, "1,0.0,10.0,2").unwrap();
        writeln!(file, "1,0.0,12.0,2").unwrap();
        assert!(matches!(
            load_detector_map(Some(file.path())),
            Err(DetectorMapError::DetectorError(_))
        ));
    }

    #[test]
    fn test_huge_phi_count() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "eta,y_pos,width,n_phi").unwrap();
        writeln!(file, "1,0.0,10.0,{},-5.0,0.0", usize::MAX).unwrap();
        assert!(matches!(
            load_detector_map(Some(file.path())),
            Err(DetectorMapError::BadFileFormat(2))
        ));
    }
}
