//! Prompt templates for the model-backed steps.

use brandlens_models::Prompt;
use brandlens_shared::BrandProfile;

const BRAND_PROFILE_SYSTEM: &str = "You are a brand strategist. You read the text of a company's \
website and describe the brand behind it. Answer with a single JSON object and nothing else.";

const COMPETITOR_SYSTEM: &str = "You are a market analyst. Given a brand profile and the brand's \
own website text, you identify its most relevant competitors. Answer with a single JSON object \
and nothing else.";

const BRAND_PROFILE_SCHEMA: &str = r#"{
  "name": "brand name",
  "tagline": "short tagline, if any",
  "summary": "two or three sentences on what the brand does",
  "industry": "primary industry",
  "targetAudience": ["audience segment", "..."],
  "valuePropositions": ["value proposition", "..."],
  "toneOfVoice": "how the brand speaks",
  "keywords": ["keyword", "..."]
}"#;

const COMPETITOR_SCHEMA: &str = r#"{
  "competitors": [
    {
      "name": "competitor name",
      "website": "https://...",
      "positioning": "how they position themselves",
      "overlapReason": "why they compete with the brand"
    }
  ],
  "marketSummary": "one paragraph on the competitive landscape"
}"#;

/// Prompt for the brand-profile task.
pub fn brand_profile(url: &str, content: &str) -> Prompt {
    Prompt {
        system: BRAND_PROFILE_SYSTEM.to_string(),
        user: format!(
            "Website: {url}\n\n\
             Return JSON with exactly this shape:\n{BRAND_PROFILE_SCHEMA}\n\n\
             Website content:\n<content>\n{content}\n</content>"
        ),
    }
}

/// Prompt for the competitor-analysis task.
pub fn competitor_analysis(url: &str, profile: &BrandProfile, content: &str) -> Prompt {
    let profile_json = serde_json::to_string_pretty(profile).unwrap_or_default();
    Prompt {
        system: COMPETITOR_SYSTEM.to_string(),
        user: format!(
            "Website: {url}\n\n\
             Brand profile:\n{profile_json}\n\n\
             List up to eight competitors. Return JSON with exactly this shape:\n\
             {COMPETITOR_SCHEMA}\n\n\
             Website content:\n<content>\n{content}\n</content>"
        ),
    }
}
