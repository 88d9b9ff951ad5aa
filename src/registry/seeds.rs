//! 种子 Approach：注册表为空（bootstrap 状态）时的固定回退集合

use crate::registry::{Approach, ApproachOrigin, SignatureRequirements, StyleMetadata};

pub const SEED_COMPREHENSIVE: &str = "seed:comprehensive";
pub const SEED_ANALYTICAL: &str = "seed:analytical";
pub const SEED_CONCISE: &str = "seed:concise";

pub fn seed_approaches() -> Vec<Approach> {
    vec![
        Approach::new(SEED_COMPREHENSIVE, "Comprehensive overview")
            .with_origin(ApproachOrigin::Seed)
            .with_style(StyleMetadata {
                depth: Some("thorough".into()),
                structure: Some("sectioned markdown with headings and bullet lists".into()),
                ..Default::default()
            })
            .with_signature(SignatureRequirements {
                min_paragraphs: Some(3),
                require_examples: true,
                ..Default::default()
            }),
        Approach::new(SEED_ANALYTICAL, "Analytical deep dive")
            .with_origin(ApproachOrigin::Seed)
            .with_style(StyleMetadata {
                tone: Some("analytical and evidence-driven".into()),
                depth: Some("deep".into()),
                emphasis: vec!["trade-offs".into(), "supporting data".into()],
                ..Default::default()
            })
            .with_signature(SignatureRequirements {
                require_sources: true,
                ..Default::default()
            }),
        Approach::new(SEED_CONCISE, "Concise briefing")
            .with_origin(ApproachOrigin::Seed)
            .with_style(StyleMetadata {
                tone: Some("direct".into()),
                depth: Some("focused".into()),
                structure: Some("short paragraphs with a closing summary".into()),
                ..Default::default()
            })
            .with_signature(SignatureRequirements {
                max_chars: Some(2500),
                ..Default::default()
            }),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeds_are_active_and_unique() {
        let seeds = seed_approaches();
        assert_eq!(seeds.len(), 3);
        assert!(seeds.iter().all(|a| a.is_active() && a.origin == ApproachOrigin::Seed));
        let mut ids: Vec<&str> = seeds.iter().map(|a| a.id.as_str()).collect();
        ids.dedup();
        assert_eq!(ids.len(), 3);
    }
}
