// src/payroll.rs

use std::fmt;

use tracing::debug;

use crate::hierarchy::ResolvedPath;

/// The payroll that processes an employee, derived purely from where the
/// employee sits in the organizational tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayrollEntity {
    Lemac,
    NotOnPayroll,
    AcornUk,
    AcornGermanyBureau,
    AcornItalyBureau,
    AcornFranceBureau,
    AcornSouthAfricaMazars,
    AcornIncAdp,
    AcornAustraliaBureau,
    AcornNewZealand,
    AcornIsleOfMan,
    AcornCanadaAdp,
    AcornSingaporeBureau,
    UnknownPayroll,
}

impl PayrollEntity {
    pub fn label(&self) -> &'static str {
        match self {
            PayrollEntity::Lemac => "Lemac",
            PayrollEntity::NotOnPayroll => "Not on payroll",
            PayrollEntity::AcornUk => "Acorn UK",
            PayrollEntity::AcornGermanyBureau => "Acorn Germany (Bureau)",
            PayrollEntity::AcornItalyBureau => "Acorn Italy (Bureau)",
            PayrollEntity::AcornFranceBureau => "Acorn France (Bureau)",
            PayrollEntity::AcornSouthAfricaMazars => "Acorn South Africa (Mazars)",
            PayrollEntity::AcornIncAdp => "Acorn Inc (ADP)",
            PayrollEntity::AcornAustraliaBureau => "Acorn Australia (Bureau)",
            PayrollEntity::AcornNewZealand => "Acorn New Zealand",
            PayrollEntity::AcornIsleOfMan => "Acorn Isle of Man",
            PayrollEntity::AcornCanadaAdp => "Acorn Canada (ADP)",
            PayrollEntity::AcornSingaporeBureau => "Acorn Singapore (Bureau)",
            PayrollEntity::UnknownPayroll => "Unknown",
        }
    }

    /// Payrolls processed in ADP, the population the reconciliation report
    /// cross-checks against the ADP workers feed.
    pub fn is_adp_processed(&self) -> bool {
        matches!(
            self,
            PayrollEntity::AcornIncAdp | PayrollEntity::AcornCanadaAdp
        )
    }
}

impl fmt::Display for PayrollEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

// --- Rule Table ---

/// Level titles a classification looks at. Absent levels arrive as "".
struct RuleInput<'a> {
    l2: &'a str,
    l3: &'a str,
    l4: &'a str,
    l6: &'a str,
}

struct PayrollRule {
    name: &'static str,
    eval: fn(&RuleInput) -> Option<PayrollEntity>,
}

/// Evaluated top to bottom, first match wins. The order carries meaning:
/// the Lemac override sits above everything, the overseas-surveyor carve-out
/// must fire before the UK and country rules claim the same divisions.
const RULES: &[PayrollRule] = &[
    PayrollRule {
        name: "lemac-override",
        eval: lemac_override,
    },
    PayrollRule {
        name: "overseas-surveyor",
        eval: overseas_surveyor,
    },
    PayrollRule {
        name: "uk-group",
        eval: uk_group,
    },
    PayrollRule {
        name: "country-of-division",
        eval: country_of_division,
    },
];

/// Country markers matched against the level-2 title, case-sensitive,
/// first hit wins.
const COUNTRY_PAYROLLS: [(&str, PayrollEntity); 10] = [
    ("Germany", PayrollEntity::AcornGermanyBureau),
    ("Italy", PayrollEntity::AcornItalyBureau),
    ("France", PayrollEntity::AcornFranceBureau),
    ("South Africa", PayrollEntity::AcornSouthAfricaMazars),
    ("USA", PayrollEntity::AcornIncAdp),
    ("Australia", PayrollEntity::AcornAustraliaBureau),
    ("New Zealand", PayrollEntity::AcornNewZealand),
    ("Isle of Man", PayrollEntity::AcornIsleOfMan),
    ("Canada", PayrollEntity::AcornCanadaAdp),
    ("Singapore", PayrollEntity::AcornSingaporeBureau),
];

const SURVEYOR_REGIONS: [&str; 4] = ["germany", "france", "italy", "uk"];

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(needle)
}

fn lemac_override(input: &RuleInput) -> Option<PayrollEntity> {
    if input.l4.contains("Lemac") {
        Some(PayrollEntity::Lemac)
    } else {
        None
    }
}

fn overseas_surveyor(input: &RuleInput) -> Option<PayrollEntity> {
    let in_region = SURVEYOR_REGIONS.iter().any(|r| contains_ci(input.l2, r));
    if !in_region {
        return None;
    }
    let is_surveyor = [input.l6, input.l4, input.l3]
        .iter()
        .any(|title| contains_ci(title, "surveyor"));
    if is_surveyor {
        Some(PayrollEntity::NotOnPayroll)
    } else {
        None
    }
}

fn uk_group(input: &RuleInput) -> Option<PayrollEntity> {
    if input.l2.contains("Group") || input.l2.contains("(UK)") || input.l3.contains("(935)") {
        Some(PayrollEntity::AcornUk)
    } else {
        None
    }
}

fn country_of_division(input: &RuleInput) -> Option<PayrollEntity> {
    COUNTRY_PAYROLLS
        .iter()
        .find(|(country, _)| input.l2.contains(country))
        .map(|(_, entity)| *entity)
}

/// Classifies a resolved hierarchy position into a payroll entity. Total:
/// any combination of titles (including all-absent) yields exactly one
/// entity, falling through to `UnknownPayroll`.
pub fn classify(
    l2: Option<&str>,
    l3: Option<&str>,
    l4: Option<&str>,
    l6: Option<&str>,
) -> PayrollEntity {
    let input = RuleInput {
        l2: l2.unwrap_or(""),
        l3: l3.unwrap_or(""),
        l4: l4.unwrap_or(""),
        l6: l6.unwrap_or(""),
    };
    for rule in RULES {
        if let Some(entity) = (rule.eval)(&input) {
            debug!("Payroll rule '{}' matched: {}", rule.name, entity);
            return entity;
        }
    }
    PayrollEntity::UnknownPayroll
}

pub fn classify_path(path: &ResolvedPath) -> PayrollEntity {
    classify(path.title(2), path.title(3), path.title(4), path.title(6))
}
