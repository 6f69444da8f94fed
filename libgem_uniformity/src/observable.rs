use std::fmt::Display;
use std::str::FromStr;

use super::error::ObservableError;
use super::graph::SummaryGraph;
use super::histogram::Histogram1D;
use super::statistics::SummaryStatistics;

/// The type of record a distribution is filled from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Cluster,
    Hit,
}

/// The recorded quantity of a distribution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Quantity {
    Adc,
    Multi,
    Pos,
    Size,
    Time,
}

/// Every named artifact the analysis can hand out to consumers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Observable {
    ClustADC,
    ClustMulti,
    ClustPos,
    ClustSize,
    ClustTime,
    HitADC,
    HitMulti,
    HitPos,
    HitTime,
    ResponseFitChi2,
    ResponseFitPkPos,
    ResponseFitPkRes,
    ResponseFitFailures,
    SpectrumNumPeaks,
    SpectrumPkPos,
}

const OBSERVABLE_NAMES: [(Observable, &str); 15] = [
    (Observable::ClustADC, "ClustADC"),
    (Observable::ClustMulti, "ClustMulti"),
    (Observable::ClustPos, "ClustPos"),
    (Observable::ClustSize, "ClustSize"),
    (Observable::ClustTime, "ClustTime"),
    (Observable::HitADC, "HitADC"),
    (Observable::HitMulti, "HitMulti"),
    (Observable::HitPos, "HitPos"),
    (Observable::HitTime, "HitTime"),
    (Observable::ResponseFitChi2, "ResponseFitChi2"),
    (Observable::ResponseFitPkPos, "ResponseFitPkPos"),
    (Observable::ResponseFitPkRes, "ResponseFitPkRes"),
    (Observable::ResponseFitFailures, "ResponseFitFailures"),
    (Observable::SpectrumNumPeaks, "SpectrumNumPeaks"),
    (Observable::SpectrumPkPos, "SpectrumPkPos"),
];

impl Observable {
    pub fn all() -> impl Iterator<Item = Observable> {
        OBSERVABLE_NAMES.iter().map(|(obs, _)| *obs)
    }

    pub fn name(&self) -> &'static str {
        OBSERVABLE_NAMES
            .iter()
            .find(|(obs, _)| obs == self)
            .map(|(_, name)| *name)
            .unwrap_or("Unknown")
    }

    /// Which distribution backs this observable, if it is a distribution
    pub fn distribution(&self) -> Option<(RecordKind, Quantity)> {
        match self {
            Self::ClustADC => Some((RecordKind::Cluster, Quantity::Adc)),
            Self::ClustMulti => Some((RecordKind::Cluster, Quantity::Multi)),
            Self::ClustPos => Some((RecordKind::Cluster, Quantity::Pos)),
            Self::ClustSize => Some((RecordKind::Cluster, Quantity::Size)),
            Self::ClustTime => Some((RecordKind::Cluster, Quantity::Time)),
            Self::HitADC => Some((RecordKind::Hit, Quantity::Adc)),
            Self::HitMulti => Some((RecordKind::Hit, Quantity::Multi)),
            Self::HitPos => Some((RecordKind::Hit, Quantity::Pos)),
            Self::HitTime => Some((RecordKind::Hit, Quantity::Time)),
            _ => None,
        }
    }
}

impl Display for Observable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Observable {
    type Err = ObservableError;
    /// Case-insensitive lookup; "ResponseFitNormChi2" is accepted as an alias of the chi2 graph
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("ResponseFitNormChi2") {
            return Ok(Self::ResponseFitChi2);
        }
        OBSERVABLE_NAMES
            .iter()
            .find(|(_, name)| name.eq_ignore_ascii_case(s))
            .map(|(obs, _)| *obs)
            .ok_or_else(|| ObservableError::UnknownObservable(s.to_string()))
    }
}

/// A borrowed analysis artifact returned from a name lookup
#[derive(Debug, Clone, Copy)]
pub enum Artifact<'a> {
    Histogram(&'a Histogram1D),
    Graph(&'a SummaryGraph),
    Statistics(&'a SummaryStatistics),
}

impl<'a> Artifact<'a> {
    pub fn as_histogram(&self) -> Option<&'a Histogram1D> {
        match self {
            Self::Histogram(h) => Some(h),
            _ => None,
        }
    }

    pub fn as_graph(&self) -> Option<&'a SummaryGraph> {
        match self {
            Self::Graph(g) => Some(g),
            _ => None,
        }
    }

    pub fn as_statistics(&self) -> Option<&'a SummaryStatistics> {
        match self {
            Self::Statistics(s) => Some(s),
            _ => None,
        }
    }
}

/// Build the unique name of an artifact from its place in the hierarchy.
///
/// e.g. `hiEta2iPhi1Slice3_ClustADC` or `giEta4_ClustADC_Fit_PkPos`
pub fn name_by_index(
    prefix: &str,
    eta: Option<i32>,
    phi: Option<i32>,
    slice: Option<usize>,
    obs: &str,
) -> String {
    let mut name = String::from(prefix);
    if let Some(eta) = eta {
        name.push_str(&format!("iEta{eta}"));
    }
    if let Some(phi) = phi {
        name.push_str(&format!("iPhi{phi}"));
    }
    if let Some(slice) = slice {
        name.push_str(&format!("Slice{slice}"));
    }
    name.push('_');
    name.push_str(obs);
    name
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observable_lookup() {
        assert_eq!(
            Observable::from_str("clustadc").unwrap(),
            Observable::ClustADC
        );
        assert_eq!(
            Observable::from_str("ResponseFitNormChi2").unwrap(),
            Observable::ResponseFitChi2
        );
        assert_eq!(
            Observable::from_str("ClustCharge"),
            Err(ObservableError::UnknownObservable("ClustCharge".to_string()))
        );
        for obs in Observable::all() {
            assert_eq!(Observable::from_str(obs.name()).unwrap(), obs);
        }
    }

    #[test]
    fn test_name_by_index() {
        assert_eq!(
            name_by_index("h", Some(2), Some(1), Some(3), "ClustADC"),
            "hiEta2iPhi1Slice3_ClustADC"
        );
        assert_eq!(
            name_by_index("g", Some(4), None, None, "ClustADC_Fit_PkPos"),
            "giEta4_ClustADC_Fit_PkPos"
        );
        assert_eq!(name_by_index("h", None, None, None, "ClustADC"), "h_ClustADC");
    }
}
