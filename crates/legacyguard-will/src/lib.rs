//! # LegacyGuard Will Validation
//!
//! Pure rule engine checking a structured will document against
//! jurisdiction-specific requirements. No lifecycle, no I/O — a document
//! goes in, a list of issues comes out.
//!
//! Supported jurisdictions: SK, CZ, MD, UA, RS, AL, MK, ME. Unsupported
//! country codes produce a warning, not an error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A structured will document, as submitted by the validation webhook.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WillContent {
    pub testator: Option<Testator>,
    /// Absent and empty mean different things to some rules, so both
    /// stay observable.
    pub beneficiaries: Option<Vec<Beneficiary>>,
    pub witnesses: Option<Vec<Witness>>,
    #[serde(default)]
    pub sound_mind_declaration: bool,
    #[serde(default)]
    pub requires_notarization: bool,
    pub executor: Option<String>,
    pub special_bequests: Option<Vec<SpecialBequest>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Testator {
    pub name: Option<String>,
    pub birth_date: Option<String>,
    pub address: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Beneficiary {
    pub name: Option<String>,
    #[serde(default)]
    pub allocation: Vec<Allocation>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Allocation {
    pub asset_type: String,
    #[serde(default)]
    pub value: f64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Witness {
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpecialBequest {
    pub description: Option<String>,
    pub condition: Option<String>,
}

/// Issue severity. Only `Error` makes a will invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

/// One finding against the document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationIssue {
    pub severity: Severity,
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

/// Full validation result.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationOutcome {
    pub is_valid: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<ValidationIssue>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub recommendations: Vec<String>,
    pub validated_at: DateTime<Utc>,
}

/// Validate a will against one jurisdiction's rules plus the common ones.
pub fn validate(country_code: &str, will: &WillContent) -> ValidationOutcome {
    let mut issues = Vec::new();
    let mut recommendations = Vec::new();

    match country_code {
        "SK" => validate_slovak(will, &mut issues, &mut recommendations),
        "CZ" => validate_czech(will, &mut issues, &mut recommendations),
        "MD" => validate_moldovan(will, &mut issues, &mut recommendations),
        "UA" => validate_ukrainian(will, &mut issues, &mut recommendations),
        "RS" => validate_serbian(will, &mut issues, &mut recommendations),
        "AL" => validate_albanian(will, &mut issues, &mut recommendations),
        "MK" => validate_macedonian(will, &mut issues, &mut recommendations),
        "ME" => validate_montenegrin(will, &mut issues, &mut recommendations),
        _ => issues.push(issue(
            Severity::Warning,
            "UNSUPPORTED_COUNTRY",
            "Country-specific validation not available",
            None,
        )),
    }

    validate_common(will, &mut issues, &mut recommendations);

    ValidationOutcome {
        is_valid: !issues.iter().any(|i| i.severity == Severity::Error),
        issues,
        recommendations,
        validated_at: Utc::now(),
    }
}

fn issue(severity: Severity, code: &str, message: &str, field: Option<&str>) -> ValidationIssue {
    ValidationIssue {
        severity,
        code: code.to_string(),
        message: message.to_string(),
        field: field.map(String::from),
    }
}

fn filled(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|s| !s.is_empty())
}

fn testator_identified(will: &WillContent) -> bool {
    will.testator
        .as_ref()
        .is_some_and(|t| filled(&t.name) && filled(&t.birth_date))
}

fn testator_fully_identified(will: &WillContent) -> bool {
    will.testator
        .as_ref()
        .is_some_and(|t| filled(&t.name) && filled(&t.birth_date) && filled(&t.address))
}

/// Witness-count rule shared by most jurisdictions: flags only a witness
/// list that is present but short — an absent list is a different finding.
fn short_witness_list(will: &WillContent, minimum: usize) -> bool {
    will.witnesses
        .as_ref()
        .is_some_and(|w| w.len() < minimum)
}

// ─── Jurisdictions ──────────────────────────────────────

fn validate_slovak(
    will: &WillContent,
    issues: &mut Vec<ValidationIssue>,
    recommendations: &mut Vec<String>,
) {
    if !testator_identified(will) {
        issues.push(issue(
            Severity::Error,
            "SK_MISSING_TESTATOR_INFO",
            "Testator name and birth date are required",
            Some("testator"),
        ));
    }
    if will.beneficiaries.as_ref().is_none_or(|b| b.is_empty()) {
        issues.push(issue(
            Severity::Error,
            "SK_NO_BENEFICIARIES",
            "At least one beneficiary must be specified",
            None,
        ));
    }
    if short_witness_list(will, 2) {
        issues.push(issue(
            Severity::Error,
            "SK_INSUFFICIENT_WITNESSES",
            "Slovak law requires at least 2 witnesses for typed wills",
            None,
        ));
    }
    recommendations.push(
        "Consider adding alternate beneficiaries in case primary beneficiaries predecease you"
            .into(),
    );
    recommendations
        .push("Ensure witnesses are not beneficiaries to avoid conflicts of interest".into());
}

fn validate_czech(
    will: &WillContent,
    issues: &mut Vec<ValidationIssue>,
    recommendations: &mut Vec<String>,
) {
    if !will.sound_mind_declaration {
        issues.push(issue(
            Severity::Error,
            "CZ_MISSING_SOUND_MIND",
            "Czech law requires explicit declaration of sound mind",
            Some("soundMindDeclaration"),
        ));
    }
    if !will.requires_notarization {
        recommendations
            .push("Czech typed wills require notarization - ensure this is completed".into());
    }
    if short_witness_list(will, 2) {
        issues.push(issue(
            Severity::Error,
            "CZ_INSUFFICIENT_WITNESSES",
            "Czech law requires at least 2 witnesses",
            None,
        ));
    }
}

fn validate_moldovan(
    will: &WillContent,
    issues: &mut Vec<ValidationIssue>,
    recommendations: &mut Vec<String>,
) {
    if !will.sound_mind_declaration {
        issues.push(issue(
            Severity::Error,
            "MD_MISSING_SOUND_MIND",
            "Moldovan law requires explicit declaration of sound mind",
            Some("soundMindDeclaration"),
        ));
    }
    if !will.requires_notarization {
        issues.push(issue(
            Severity::Error,
            "MD_REQUIRES_NOTARIZATION",
            "Moldovan typed wills must be notarized",
            None,
        ));
    }
    if short_witness_list(will, 2) {
        issues.push(issue(
            Severity::Error,
            "MD_INSUFFICIENT_WITNESSES",
            "Moldovan law requires at least 2 witnesses",
            None,
        ));
    }
    recommendations
        .push("Ensure the will is registered with the notarial chamber for additional security".into());
}

fn validate_ukrainian(
    will: &WillContent,
    issues: &mut Vec<ValidationIssue>,
    recommendations: &mut Vec<String>,
) {
    if !will.sound_mind_declaration {
        issues.push(issue(
            Severity::Error,
            "UA_MISSING_SOUND_MIND",
            "Ukrainian law requires explicit declaration of sound mind and memory",
            Some("soundMindDeclaration"),
        ));
    }
    // Notarization is mandatory, not advisory, in Ukraine.
    if !will.requires_notarization {
        issues.push(issue(
            Severity::Error,
            "UA_MANDATORY_NOTARIZATION",
            "All wills in Ukraine must be notarized by a notary public",
            None,
        ));
    }
    recommendations.push("Consider registering your will in the Hereditary Register of Ukraine".into());
    recommendations
        .push("Ukrainian law allows for secret wills - consult a notary for this option".into());
}

fn validate_serbian(
    will: &WillContent,
    issues: &mut Vec<ValidationIssue>,
    recommendations: &mut Vec<String>,
) {
    if !testator_fully_identified(will) {
        issues.push(issue(
            Severity::Error,
            "RS_MISSING_TESTATOR_INFO",
            "Testator full identification including name, birth date, and address is required",
            Some("testator"),
        ));
    }
    if short_witness_list(will, 2) {
        issues.push(issue(
            Severity::Error,
            "RS_INSUFFICIENT_WITNESSES",
            "Serbian law requires at least 2 witnesses for typed wills",
            None,
        ));
    }
    recommendations.push("Consider depositing your will with the court for safekeeping".into());
    recommendations
        .push("Serbian law recognizes oral wills only in exceptional circumstances".into());
}

fn validate_albanian(
    will: &WillContent,
    issues: &mut Vec<ValidationIssue>,
    recommendations: &mut Vec<String>,
) {
    if !will.sound_mind_declaration {
        issues.push(issue(
            Severity::Error,
            "AL_MISSING_SOUND_MIND",
            "Albanian law requires declaration of full mental capacity",
            Some("soundMindDeclaration"),
        ));
    }
    if !will.requires_notarization {
        issues.push(issue(
            Severity::Error,
            "AL_REQUIRES_NOTARIZATION",
            "Albanian typed wills must be notarized",
            None,
        ));
    }
    // Albania requires 3 witnesses, present or not.
    if will.witnesses.as_ref().is_none_or(|w| w.len() < 3) {
        issues.push(issue(
            Severity::Error,
            "AL_INSUFFICIENT_WITNESSES",
            "Albanian law requires 3 witnesses present at signing",
            None,
        ));
    }
    recommendations.push("Witnesses must be of legal age and mentally competent".into());
    recommendations.push("Beneficiaries cannot serve as witnesses under Albanian law".into());
}

fn validate_macedonian(
    will: &WillContent,
    issues: &mut Vec<ValidationIssue>,
    recommendations: &mut Vec<String>,
) {
    if !will.sound_mind_declaration {
        issues.push(issue(
            Severity::Error,
            "MK_MISSING_SOUND_MIND",
            "Macedonian law requires declaration of full consciousness and reason",
            Some("soundMindDeclaration"),
        ));
    }
    if !will.requires_notarization {
        issues.push(issue(
            Severity::Error,
            "MK_REQUIRES_NOTARIZATION",
            "Macedonian typed wills must be notarized by a notary public",
            None,
        ));
    }
    if short_witness_list(will, 2) {
        issues.push(issue(
            Severity::Error,
            "MK_INSUFFICIENT_WITNESSES",
            "Macedonian law requires at least 2 witnesses",
            None,
        ));
    }
    recommendations
        .push("The will must be read aloud in the presence of witnesses before signing".into());
}

fn validate_montenegrin(
    will: &WillContent,
    issues: &mut Vec<ValidationIssue>,
    recommendations: &mut Vec<String>,
) {
    if !testator_fully_identified(will) {
        issues.push(issue(
            Severity::Error,
            "ME_MISSING_TESTATOR_INFO",
            "Testator full identification is required",
            Some("testator"),
        ));
    }
    if short_witness_list(will, 2) {
        issues.push(issue(
            Severity::Error,
            "ME_INSUFFICIENT_WITNESSES",
            "Montenegrin law requires at least 2 witnesses for typed wills",
            None,
        ));
    }
    recommendations.push("Consider court deposition for additional legal protection".into());
    recommendations.push("Witnesses should not be related to beneficiaries".into());
}

// ─── Common rules ──────────────────────────────────────

fn validate_common(
    will: &WillContent,
    issues: &mut Vec<ValidationIssue>,
    recommendations: &mut Vec<String>,
) {
    // Percentage allocations must total exactly 100 once any are present.
    let total_allocation: f64 = will
        .beneficiaries
        .iter()
        .flatten()
        .map(|b| {
            b.allocation
                .iter()
                .filter(|a| a.asset_type == "percentage")
                .map(|a| a.value)
                .sum::<f64>()
        })
        .sum();

    if total_allocation > 0.0 && (total_allocation - 100.0).abs() > 1e-9 {
        issues.push(issue(
            Severity::Error,
            "INVALID_ALLOCATION_TOTAL",
            &format!("Asset allocation must total 100%, currently {total_allocation}%"),
            Some("beneficiaries.allocation"),
        ));
    }

    if !filled(&will.executor) {
        issues.push(issue(
            Severity::Warning,
            "NO_EXECUTOR",
            "No executor appointed - court may need to appoint one",
            None,
        ));
        recommendations.push("Consider appointing an executor to manage your estate".into());
    }

    for (index, bequest) in will.special_bequests.iter().flatten().enumerate() {
        if bequest
            .condition
            .as_deref()
            .is_some_and(|c| c.contains("approximately"))
        {
            issues.push(issue(
                Severity::Warning,
                "AMBIGUOUS_LANGUAGE",
                "Avoid ambiguous terms like \"approximately\" in conditions",
                Some(&format!("specialBequests[{index}].condition")),
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_will() -> WillContent {
        WillContent {
            testator: Some(Testator {
                name: Some("Jana Kovacova".into()),
                birth_date: Some("1961-04-12".into()),
                address: Some("Bratislava".into()),
            }),
            beneficiaries: Some(vec![
                Beneficiary {
                    name: Some("Maria".into()),
                    allocation: vec![Allocation {
                        asset_type: "percentage".into(),
                        value: 60.0,
                    }],
                },
                Beneficiary {
                    name: Some("Peter".into()),
                    allocation: vec![Allocation {
                        asset_type: "percentage".into(),
                        value: 40.0,
                    }],
                },
            ]),
            witnesses: Some(vec![Witness::default(), Witness::default()]),
            sound_mind_declaration: true,
            requires_notarization: true,
            executor: Some("Jozef".into()),
            special_bequests: None,
        }
    }

    fn codes(outcome: &ValidationOutcome) -> Vec<&str> {
        outcome.issues.iter().map(|i| i.code.as_str()).collect()
    }

    #[test]
    fn test_complete_slovak_will_passes() {
        let outcome = validate("SK", &base_will());
        assert!(outcome.is_valid, "issues: {:?}", outcome.issues);
    }

    #[test]
    fn test_slovak_witness_minimum() {
        let mut will = base_will();
        will.witnesses = Some(vec![Witness::default()]);
        let outcome = validate("SK", &will);
        assert!(!outcome.is_valid);
        assert!(codes(&outcome).contains(&"SK_INSUFFICIENT_WITNESSES"));
    }

    #[test]
    fn test_albanian_requires_three_witnesses_even_when_absent() {
        let mut will = base_will();
        will.witnesses = None;
        let outcome = validate("AL", &will);
        assert!(codes(&outcome).contains(&"AL_INSUFFICIENT_WITNESSES"));

        will.witnesses = Some(vec![
            Witness::default(),
            Witness::default(),
            Witness::default(),
        ]);
        let outcome = validate("AL", &will);
        assert!(!codes(&outcome).contains(&"AL_INSUFFICIENT_WITNESSES"));
    }

    #[test]
    fn test_czech_sound_mind_required() {
        let mut will = base_will();
        will.sound_mind_declaration = false;
        let outcome = validate("CZ", &will);
        assert!(!outcome.is_valid);
        assert!(codes(&outcome).contains(&"CZ_MISSING_SOUND_MIND"));
    }

    #[test]
    fn test_ukrainian_notarization_is_mandatory() {
        let mut will = base_will();
        will.requires_notarization = false;
        let outcome = validate("UA", &will);
        assert!(!outcome.is_valid);
        assert!(codes(&outcome).contains(&"UA_MANDATORY_NOTARIZATION"));
        // The same omission is only advisory in CZ.
        let outcome = validate("CZ", &will);
        assert!(outcome.is_valid);
    }

    #[test]
    fn test_allocation_must_total_100() {
        let mut will = base_will();
        if let Some(bens) = will.beneficiaries.as_mut() {
            bens[1].allocation[0].value = 20.0;
        }
        let outcome = validate("SK", &will);
        assert!(!outcome.is_valid);
        assert!(codes(&outcome).contains(&"INVALID_ALLOCATION_TOTAL"));
    }

    #[test]
    fn test_no_percentage_allocations_is_fine() {
        let mut will = base_will();
        if let Some(bens) = will.beneficiaries.as_mut() {
            for b in bens.iter_mut() {
                b.allocation.clear();
            }
        }
        let outcome = validate("SK", &will);
        assert!(outcome.is_valid);
    }

    #[test]
    fn test_unsupported_country_warns_only() {
        let outcome = validate("FR", &base_will());
        assert!(outcome.is_valid);
        assert!(codes(&outcome).contains(&"UNSUPPORTED_COUNTRY"));
    }

    #[test]
    fn test_missing_executor_warns() {
        let mut will = base_will();
        will.executor = None;
        let outcome = validate("SK", &will);
        assert!(outcome.is_valid);
        assert!(codes(&outcome).contains(&"NO_EXECUTOR"));
    }

    #[test]
    fn test_ambiguous_bequest_language() {
        let mut will = base_will();
        will.special_bequests = Some(vec![SpecialBequest {
            description: Some("the painting".into()),
            condition: Some("approximately half the collection".into()),
        }]);
        let outcome = validate("SK", &will);
        assert!(outcome.is_valid);
        let ambiguous = outcome
            .issues
            .iter()
            .find(|i| i.code == "AMBIGUOUS_LANGUAGE")
            .unwrap();
        assert_eq!(
            ambiguous.field.as_deref(),
            Some("specialBequests[0].condition")
        );
    }
}
