//! # Universe Classifier
//!
//! Decides which directory instruments are eligible for ingestion and builds
//! the code/name lookup maps for one rebuild pass.
//!
//! Exclusion rules, first match reported:
//!
//! | Order | Rule |
//! |-------|------|
//! | 1 | Listing section code 1 to 8 (preferred, fund, ETF, ETN, ELW, warrant, SPAC, REIT) |
//! | 2 | Name carries a SPAC designator (`<n>호`) |
//! | 3 | Name ends in a preferred-share designator, or the code ends in a non-zero digit |
//! | 4 | Name contains the REIT marker `리츠` |
//! | 5 | Control flag, supervision flag or trading status is not normal |

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tracing::{info, warn};

use crate::{ControlKind, Instrument, InstrumentCode, MarketSegment, SectionKind, SupervisionKind};

static SPAC_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+호").expect("SPAC name pattern is valid"));

static PREFERRED_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([0-9]+|[가-힣])우[A-Z]?$").expect("preferred name pattern is valid")
});

const REIT_MARKER: &str = "리츠";

/// Shortest name the preferred-share suffix rule applies to.
const PREFERRED_NAME_MIN_CHARS: usize = 3;

/// Why an instrument was left out of the universe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum ExclusionReason {
    NonCommonSection { section: u8 },
    SpacName,
    PreferredName,
    PreferredCode,
    ReitName,
    ControlFlag { code: u8 },
    SupervisionFlag { code: u8 },
    NotTrading { status: u8 },
}

impl ExclusionReason {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NonCommonSection { .. } => "non_common_section",
            Self::SpacName => "spac_name",
            Self::PreferredName => "preferred_name",
            Self::PreferredCode => "preferred_code",
            Self::ReitName => "reit_name",
            Self::ControlFlag { .. } => "control_flag",
            Self::SupervisionFlag { .. } => "supervision_flag",
            Self::NotTrading { .. } => "not_trading",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Included,
    Excluded(ExclusionReason),
}

impl Classification {
    pub const fn is_included(self) -> bool {
        matches!(self, Self::Included)
    }
}

/// Classify one instrument. Pure function of its metadata.
pub fn classify(instrument: &Instrument) -> Classification {
    match exclusion(instrument) {
        Some(reason) => Classification::Excluded(reason),
        None => Classification::Included,
    }
}

fn exclusion(instrument: &Instrument) -> Option<ExclusionReason> {
    // Codes above 8 are unlisted kinds and fall through to the name rules.
    if matches!(
        instrument.section,
        SectionKind::Preferred
            | SectionKind::MutualFund
            | SectionKind::Etf
            | SectionKind::Etn
            | SectionKind::Elw
            | SectionKind::Warrant
            | SectionKind::Spac
            | SectionKind::Reits
    ) {
        return Some(ExclusionReason::NonCommonSection {
            section: instrument.section.code(),
        });
    }

    let name = instrument.name.trim();
    if SPAC_NAME.is_match(name) {
        return Some(ExclusionReason::SpacName);
    }

    if name.chars().count() >= PREFERRED_NAME_MIN_CHARS && PREFERRED_NAME.is_match(name) {
        return Some(ExclusionReason::PreferredName);
    }
    if instrument.code.last_digit().is_some_and(|digit| digit != 0) {
        return Some(ExclusionReason::PreferredCode);
    }

    if name.contains(REIT_MARKER) {
        return Some(ExclusionReason::ReitName);
    }

    if let ControlKind::Flagged(code) = instrument.control {
        return Some(ExclusionReason::ControlFlag { code });
    }
    if let SupervisionKind::Flagged(code) = instrument.supervision {
        return Some(ExclusionReason::SupervisionFlag { code });
    }
    if !instrument.status.is_tradable() {
        return Some(ExclusionReason::NotTrading {
            status: instrument.status.code(),
        });
    }

    None
}

/// Two surviving instruments shared one display name; the later one won.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NameCollision {
    pub name: String,
    pub kept: InstrumentCode,
    pub dropped: InstrumentCode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Exclusion {
    pub code: InstrumentCode,
    pub name: String,
    pub reason: ExclusionReason,
}

/// Eligible instruments of one rebuild pass.
///
/// `by_code` and `by_name` are kept bijective: every included code has
/// exactly one name entry pointing back at it.
#[derive(Debug, Clone, Default)]
pub struct Universe {
    by_code: BTreeMap<InstrumentCode, Instrument>,
    by_name: BTreeMap<String, InstrumentCode>,
    exclusions: Vec<Exclusion>,
    collisions: Vec<NameCollision>,
}

impl Universe {
    /// Classify `instruments` in order and build the lookup maps.
    pub fn build(instruments: impl IntoIterator<Item = Instrument>) -> Self {
        let mut universe = Self::default();
        for instrument in instruments {
            match classify(&instrument) {
                Classification::Included => universe.admit(instrument),
                Classification::Excluded(reason) => universe.exclusions.push(Exclusion {
                    code: instrument.code,
                    name: instrument.name,
                    reason,
                }),
            }
        }

        info!(
            included = universe.by_code.len(),
            excluded = universe.exclusions.len(),
            name_collisions = universe.collisions.len(),
            "universe rebuilt"
        );
        universe
    }

    fn admit(&mut self, instrument: Instrument) {
        let code = instrument.code.clone();
        let name = instrument.name.trim().to_owned();

        // Same code listed again under a different name.
        if let Some(previous) = self.by_code.remove(&code) {
            let previous_name = previous.name.trim();
            if self.by_name.get(previous_name) == Some(&code) {
                self.by_name.remove(previous_name);
            }
        }

        if let Some(dropped) = self.by_name.insert(name.clone(), code.clone()) {
            if dropped != code {
                warn!(
                    name = %name,
                    kept = %code,
                    dropped = %dropped,
                    "duplicate display name in universe; keeping last seen"
                );
                self.by_code.remove(&dropped);
                self.collisions.push(NameCollision {
                    name,
                    kept: code.clone(),
                    dropped,
                });
            }
        }

        self.by_code.insert(code, instrument);
    }

    pub fn len(&self) -> usize {
        self.by_code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_code.is_empty()
    }

    pub fn contains(&self, code: &InstrumentCode) -> bool {
        self.by_code.contains_key(code)
    }

    pub fn name_of(&self, code: &InstrumentCode) -> Option<&str> {
        self.by_code.get(code).map(|instrument| instrument.name.as_str())
    }

    pub fn code_of(&self, name: &str) -> Option<&InstrumentCode> {
        self.by_name.get(name.trim())
    }

    /// Included codes in ascending order.
    pub fn codes(&self) -> impl Iterator<Item = &InstrumentCode> {
        self.by_code.keys()
    }

    pub fn instruments(&self) -> impl Iterator<Item = &Instrument> {
        self.by_code.values()
    }

    pub fn in_market(&self, market: MarketSegment) -> impl Iterator<Item = &Instrument> {
        self.by_code
            .values()
            .filter(move |instrument| instrument.market == market)
    }

    pub fn exclusions(&self) -> &[Exclusion] {
        &self.exclusions
    }

    pub fn collisions(&self) -> &[NameCollision] {
        &self.collisions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TradingStatus;

    fn common(code: &str, name: &str) -> Instrument {
        Instrument::common(
            InstrumentCode::parse(code).expect("code"),
            name,
            MarketSegment::Kospi,
        )
    }

    #[test]
    fn ordinary_common_share_is_included() {
        assert_eq!(classify(&common("A005930", "삼성전자")), Classification::Included);
    }

    #[test]
    fn spac_name_is_excluded() {
        assert_eq!(
            classify(&common("A475240", "한양디지텍3호")),
            Classification::Excluded(ExclusionReason::SpacName)
        );
    }

    #[test]
    fn listed_section_codes_are_excluded_and_unlisted_codes_pass() {
        for code in 1..=8 {
            let mut instrument = common("A123450", "보통회사");
            instrument.section = SectionKind::from_code(code);
            assert_eq!(
                classify(&instrument),
                Classification::Excluded(ExclusionReason::NonCommonSection { section: code }),
                "section {code}"
            );
        }

        let mut instrument = common("A123450", "보통회사");
        instrument.section = SectionKind::from_code(9);
        assert_eq!(instrument.section, SectionKind::Other(9));
        assert_eq!(classify(&instrument), Classification::Included);

        let mut spac = common("A123450", "하나15호스팩");
        spac.section = SectionKind::from_code(12);
        assert_eq!(classify(&spac), Classification::Excluded(ExclusionReason::SpacName));
    }

    #[test]
    fn non_zero_code_suffix_is_excluded() {
        assert_eq!(
            classify(&common("A005937", "가나다라")),
            Classification::Excluded(ExclusionReason::PreferredCode)
        );
    }

    #[test]
    fn preferred_name_suffixes_are_excluded() {
        for name in ["삼성전자우", "현대차2우B", "대신증권우B"] {
            assert_eq!(
                classify(&common("A005930", name)),
                Classification::Excluded(ExclusionReason::PreferredName),
                "{name}"
            );
        }
        // Two-character names are too short for the suffix rule.
        assert_eq!(classify(&common("A047040", "대우")), Classification::Included);
    }

    #[test]
    fn reit_marker_is_excluded() {
        assert_eq!(
            classify(&common("A330590", "OO리츠")),
            Classification::Excluded(ExclusionReason::ReitName)
        );
    }

    #[test]
    fn non_common_section_wins_over_name_rules() {
        let mut etf = common("A069500", "KODEX 200");
        etf.section = SectionKind::Etf;
        assert_eq!(
            classify(&etf),
            Classification::Excluded(ExclusionReason::NonCommonSection { section: 3 })
        );
    }

    #[test]
    fn status_flags_are_excluded() {
        let mut flagged = common("A000020", "동화약품");
        flagged.supervision = SupervisionKind::from_code(1);
        assert_eq!(
            classify(&flagged),
            Classification::Excluded(ExclusionReason::SupervisionFlag { code: 1 })
        );

        let mut halted = common("A000020", "동화약품");
        halted.status = TradingStatus::Halted;
        assert_eq!(
            classify(&halted),
            Classification::Excluded(ExclusionReason::NotTrading { status: 2 })
        );

        let mut controlled = common("A000020", "동화약품");
        controlled.control = ControlKind::from_code(2);
        assert!(!classify(&controlled).is_included());
    }

    #[test]
    fn universe_maps_are_bijective() {
        let universe = Universe::build(vec![
            common("A005930", "삼성전자"),
            common("A005935", "삼성전자우"),
            common("A000660", "SK하이닉스"),
        ]);

        assert_eq!(universe.len(), 2);
        let code = universe.code_of("SK하이닉스").expect("name lookup");
        assert_eq!(universe.name_of(code), Some("SK하이닉스"));
        assert_eq!(universe.exclusions().len(), 1);
        assert_eq!(universe.exclusions()[0].reason, ExclusionReason::PreferredName);
    }

    #[test]
    fn duplicate_name_keeps_last_seen_and_flags_collision() {
        let universe = Universe::build(vec![
            common("A111110", "중복상사"),
            common("A222220", "중복상사"),
        ]);

        assert_eq!(universe.len(), 1);
        assert_eq!(
            universe.code_of("중복상사").map(InstrumentCode::as_str),
            Some("A222220")
        );
        assert!(!universe.contains(&InstrumentCode::parse("A111110").expect("code")));
        assert_eq!(universe.collisions().len(), 1);
        assert_eq!(universe.collisions()[0].dropped.as_str(), "A111110");
    }

    #[test]
    fn relisted_code_replaces_its_old_name() {
        let universe = Universe::build(vec![
            common("A333330", "옛이름"),
            common("A333330", "새이름"),
        ]);

        assert_eq!(universe.len(), 1);
        assert!(universe.code_of("옛이름").is_none());
        assert_eq!(
            universe.code_of("새이름").map(InstrumentCode::as_str),
            Some("A333330")
        );
        assert!(universe.collisions().is_empty());
    }
}
