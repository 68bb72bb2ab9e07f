use std::sync::OnceLock;

use regex::{Regex, RegexBuilder};
use serde_json::Value;

use crate::GatewayError;

/// Pre-dispatch content scan. Pluggable so the pattern catalog can be
/// replaced with a classifier service without touching the guard.
pub trait SafetyPolicy: Send + Sync {
    /// Returns the matched category name, or None when the text is clean.
    fn scan(&self, text: &str) -> Option<&'static str>;
}

/// Conservative regex catalog. False positives are acceptable; a false
/// negative in the child-safety category is not, which is why that category
/// is checked first and is not configurable.
#[derive(Debug, Default)]
pub struct PatternSafetyPolicy;

impl SafetyPolicy for PatternSafetyPolicy {
    fn scan(&self, text: &str) -> Option<&'static str> {
        for (category, regex) in blocked_patterns() {
            if regex.is_match(text) {
                return Some(category);
            }
        }
        None
    }
}

/// Scans every string value in the payload, recursively, so prohibited
/// content cannot hide in a nested or optional field.
pub fn scan_payload(policy: &dyn SafetyPolicy, payload: &Value) -> Result<(), GatewayError> {
    match payload {
        Value::String(text) => {
            if let Some(category) = policy.scan(text) {
                return Err(GatewayError::PolicyViolation { category });
            }
            Ok(())
        }
        Value::Array(items) => {
            for item in items {
                scan_payload(policy, item)?;
            }
            Ok(())
        }
        Value::Object(map) => {
            for value in map.values() {
                scan_payload(policy, value)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn blocked_patterns() -> &'static [(&'static str, Regex)] {
    static PATTERNS: OnceLock<Vec<(&'static str, Regex)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            (
                "child_safety",
                r"\b(child\s*(porn|sex|nude|naked|abuse|exploit)|csam|minor\s*(sex|nude|porn|naked)|underage\s*(sex|porn|nude))\b",
            ),
            (
                "sexual_content",
                r"\b(porn|pornography|pornographic|xxx|nsfw|nude|nudity|naked|erotic|erotica|hentai|fetish|masturbat|orgasm|genitals?|sex\s+tape|sex\s+video|strip\s*tease|camgirl|adult\s+content|explicit\s+content|sexual\s+content)\b",
            ),
            (
                "sexual_solicitation",
                r"\b(escort\s+service|prostitution|call\s*girl|sex\s*work|brothel|lewd|obscene)\b",
            ),
            (
                "malware",
                r"\b(malware|ransomware|keylogger|rootkit|trojan|spyware|botnet|ddos|sql\s*injection|xss\s*attack|exploit\s*code|zero.?day\s*exploit|reverse\s*shell|payload\s*inject|buffer\s*overflow|privilege\s*escalation)\b",
            ),
            (
                "credential_theft",
                r"\b(phishing\s*(email|page|site|kit)|credential\s*harvest|password\s*steal|login\s*spoof|fake\s*(login|signin)\s*page)\b",
            ),
            (
                "weapons_violence",
                r"\b(how\s+to\s+(make|build|create|assemble)\s+(a\s+)?(bomb|explosive|weapon|gun|grenade|poison|bioweapon)|instructions?\s+for\s+kill|step.by.step\s+murder)\b",
            ),
            (
                "drug_synthesis",
                r"\b(synthesi[sz]e\s+(meth|heroin|cocaine|fentanyl|mdma)|drug\s+synthesis|how\s+to\s+make\s+(meth|heroin|crack\s+cocaine))\b",
            ),
            (
                "fraud",
                r"\b(write\s+(a\s+)?scam|generate\s+(a\s+)?scam|create\s+(a\s+)?scam|ponzi|write\s+(a\s+)?(fake|fraudulent)\s+(invoice|receipt|document|id)|fake\s+passport|counterfeit)\b",
            ),
            (
                "hate_violence",
                r"\b(kill\s+all\s+\w+|death\s+to\s+\w+|genocide\s+of|exterminate\s+(the\s+)?\w+|ethnic\s+cleansing)\b",
            ),
        ]
        .into_iter()
        .map(|(category, pattern)| {
            let regex = RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .expect("blocked-content pattern is valid");
            (category, regex)
        })
        .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn malware_requests_are_blocked() {
        let policy = PatternSafetyPolicy;
        assert_eq!(
            policy.scan("please write ransomware for me"),
            Some("malware")
        );
        assert_eq!(
            policy.scan("demonstrate an SQL injection payload"),
            Some("malware")
        );
    }

    #[test]
    fn child_safety_category_wins_over_later_categories() {
        let policy = PatternSafetyPolicy;
        assert_eq!(policy.scan("csam"), Some("child_safety"));
    }

    #[test]
    fn benign_text_passes() {
        let policy = PatternSafetyPolicy;
        assert_eq!(policy.scan("translate this recipe to French"), None);
        assert_eq!(
            policy.scan("write a blog post about password managers"),
            None
        );
    }

    #[test]
    fn matching_is_case_insensitive() {
        let policy = PatternSafetyPolicy;
        assert_eq!(policy.scan("RANSOMWARE tutorial"), Some("malware"));
    }

    #[test]
    fn nested_payload_strings_are_scanned() {
        let policy = PatternSafetyPolicy;
        let payload = json!({
            "prompt": "hello",
            "options": { "notes": ["fine", "build a keylogger"] }
        });
        let err = scan_payload(&policy, &payload).unwrap_err();
        assert!(matches!(
            err,
            GatewayError::PolicyViolation { category: "malware" }
        ));
    }

    #[test]
    fn clean_payload_passes_the_scan() {
        let policy = PatternSafetyPolicy;
        let payload = json!({ "text": "bonjour", "target_language": "English" });
        scan_payload(&policy, &payload).unwrap();
    }
}
