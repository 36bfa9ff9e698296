//! 从自由格式的诊断文本中尽力提取字段。
//!
//! 各字段的规则相互独立；每个字段取文本中最靠左的带标签片段。
//! 未匹配的字段保持为 `None`。

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::ParsedDiagnosis;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    PlantName,
    Disease,
    Severity,
    Treatment,
}

/** \brief 标签之后捕获值的延伸范围。 */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CaptureScope {
    /** \brief 截至下一个换行或句号。 */
    Sentence,
    /** \brief 截至行尾，保留句号。 */
    Line,
}

struct Rule {
    field: Field,
    labels: &'static [&'static str],
    scope: CaptureScope,
}

const RULES: &[Rule] = &[
    Rule {
        field: Field::PlantName,
        labels: &["plant name", "plant", "leaf"],
        scope: CaptureScope::Sentence,
    },
    Rule {
        field: Field::Disease,
        labels: &["disease name", "disease"],
        scope: CaptureScope::Sentence,
    },
    Rule {
        field: Field::Severity,
        labels: &["severity"],
        scope: CaptureScope::Sentence,
    },
    Rule {
        field: Field::Treatment,
        labels: &["treatment", "recommendation"],
        scope: CaptureScope::Line,
    },
];

static COMPILED: Lazy<Vec<(Field, Regex)>> = Lazy::new(|| {
    RULES
        .iter()
        .filter_map(|rule| {
            let labels = rule
                .labels
                .iter()
                .map(|l| regex::escape(l).replace(' ', r"[ \t]+"))
                .collect::<Vec<_>>()
                .join("|");
            let capture = match rule.scope {
                CaptureScope::Sentence => r"[^\n.]+",
                CaptureScope::Line => r"[^\n]+",
            };
            // 标签与值必须在同一行。
            let pattern = format!(r"(?i)\b(?:{})\b[* \t]*:[* \t]*({})", labels, capture);
            Regex::new(&pattern).ok().map(|re| (rule.field, re))
        })
        .collect()
});

/**
 * \brief 从模型回复中提取植物名称、病害、严重程度与治疗方案。
 * \details 纯函数且全定义：任何输入都得到合法结果。
 */
pub fn parse(text: &str) -> ParsedDiagnosis {
    let mut out = ParsedDiagnosis::default();
    for (field, re) in COMPILED.iter() {
        let value = re
            .captures_iter(text)
            .filter_map(|caps| caps.get(1))
            .map(|m| clean(m.as_str()))
            .find(|v| !v.is_empty());
        let slot = match field {
            Field::PlantName => &mut out.plant_name,
            Field::Disease => &mut out.disease,
            Field::Severity => &mut out.severity,
            Field::Treatment => &mut out.treatment,
        };
        *slot = value;
    }

    if out.disease.is_none() && text.to_lowercase().contains("healthy") {
        out.disease = Some("Healthy".to_string());
    }
    out
}

fn clean(raw: &str) -> String {
    raw.trim().trim_end_matches('*').trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn some(s: &str) -> Option<String> {
        Some(s.to_string())
    }

    #[test]
    fn test_labelled_report() {
        let parsed = parse(
            "Plant: Tomato leaf\nDisease: Early Blight\nSeverity: moderate\nTreatment: apply copper fungicide weekly",
        );
        assert_eq!(
            parsed,
            ParsedDiagnosis {
                plant_name: some("Tomato leaf"),
                disease: some("Early Blight"),
                severity: some("moderate"),
                treatment: some("apply copper fungicide weekly"),
            }
        );
    }

    #[test]
    fn test_healthy_fallback() {
        let parsed = parse("Leaf looks healthy overall.");
        assert_eq!(
            parsed,
            ParsedDiagnosis {
                plant_name: None,
                disease: some("Healthy"),
                severity: None,
                treatment: None,
            }
        );
    }

    #[test]
    fn test_healthy_phrase_from_prompt_is_not_a_disease_label() {
        let parsed = parse("Healthy leaf - koi disease nahi hai. Aapka paudha bilkul fit hai!");
        assert_eq!(parsed.disease, some("Healthy"));
        assert_eq!(parsed.plant_name, None);
    }

    #[test]
    fn test_empty_and_unlabelled_inputs() {
        assert_eq!(parse(""), ParsedDiagnosis::default());
        assert_eq!(parse("kuch bhi nahi mila"), ParsedDiagnosis::default());
        assert_eq!(parse("healthy").disease, some("Healthy"));
        assert_eq!(parse("Disease:\n"), ParsedDiagnosis::default());
    }

    #[test]
    fn test_empty_label_does_not_borrow_next_line() {
        let parsed = parse("Disease:\nSeverity: moderate");
        assert_eq!(parsed.disease, None);
        assert_eq!(parsed.severity, some("moderate"));

        let parsed = parse("Disease: **\nPlant: Tomato leaf\nPatta healthy dikh raha hai");
        assert_eq!(parsed.disease, some("Healthy"));
        assert_eq!(parsed.plant_name, some("Tomato leaf"));

        let parsed = parse("Treatment:\nNeem oil spray\nTreatment: Neem oil spray weekly");
        assert_eq!(parsed.treatment, some("Neem oil spray weekly"));
    }

    #[test]
    fn test_sentence_scope_stops_at_period_but_treatment_does_not() {
        let parsed = parse(
            "Severity: mild. Spreading slowly\nRecommendation: spray Mancozeb 2.5 g/L, e.g. twice a week.",
        );
        assert_eq!(parsed.severity, some("mild"));
        assert_eq!(
            parsed.treatment,
            some("spray Mancozeb 2.5 g/L, e.g. twice a week.")
        );
    }

    #[test]
    fn test_case_insensitive_and_markdown_labels() {
        let parsed = parse("**PLANT NAME:** Wheat leaf\n**disease name**: Leaf Rust\nTREATMENT - none");
        assert_eq!(parsed.plant_name, some("Wheat leaf"));
        assert_eq!(parsed.disease, some("Leaf Rust"));
        assert_eq!(parsed.treatment, None);
    }

    #[test]
    fn test_leftmost_label_wins() {
        let parsed = parse("Leaf: Mango\nPlant: Banana");
        assert_eq!(parsed.plant_name, some("Mango"));
    }

    #[test]
    fn test_explicit_disease_beats_healthy_fallback() {
        let parsed = parse("Disease: Powdery Mildew\nBaaki paudha healthy hai");
        assert_eq!(parsed.disease, some("Powdery Mildew"));
    }

    #[test]
    fn test_parse_is_pure() {
        let text = "Plant: Chilli\nDisease: Leaf Curl\nSeverity: severe";
        assert_eq!(parse(text), parse(text));
    }

    #[test]
    fn test_non_ascii_input_does_not_panic() {
        let parsed = parse("पौधा: टमाटर 🌿\nDisease: झुलसा रोग\n\u{0}\u{FFFF}");
        assert_eq!(parsed.disease, some("झुलसा रोग"));
    }
}
