//! The matchmaking endpoint: accepts live posting/profile records,
//! materializes them into the document store, runs a reconciliation batch,
//! and returns the verdicts.

use axum::{extract::State, Json};
use serde::Deserialize;
use tracing::{debug, info};

use crate::engine::BatchOutcome;
use crate::errors::AppError;
use crate::state::AppState;
use crate::store::{DocKind, DocumentStore};

/// Wire shape pushed by the frontend. Field names follow the upstream
/// payload, capitalization included.
#[derive(Debug, Deserialize)]
pub struct PostingRecord {
    #[serde(rename = "ID")]
    pub id: i64,
    pub title: String,
    pub company: String,
    pub location: Option<String>,
    pub about: Option<String>,
    pub job_description: Option<String>,
    pub responsibilities: Option<String>,
    pub qualifications: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ProfileRecord {
    #[serde(rename = "ID")]
    pub id: i64,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Profile")]
    pub profile: Option<String>,
    pub experience: Option<String>,
    pub education: Option<String>,
    pub skills: Option<String>,
    pub extracurricular: Option<String>,
    pub preferences: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MatchRequest {
    pub postings: Vec<PostingRecord>,
    pub profiles: Vec<ProfileRecord>,
}

/// POST /api/v1/matchmaking/run
pub async fn handle_run_matchmaking(
    State(state): State<AppState>,
    Json(req): Json<MatchRequest>,
) -> Result<Json<BatchOutcome>, AppError> {
    info!(
        postings = req.postings.len(),
        profiles = req.profiles.len(),
        "received matchmaking request"
    );

    sync_batch(state.store.as_ref(), &req.postings, &req.profiles).await?;
    let outcome = state.engine.run_batch().await?;

    info!(matches = outcome.matches.len(), "returning matchmaking results");
    Ok(Json(outcome))
}

/// Replaces both document corpora with the live records. Postings are keyed
/// by title, profiles by name.
pub async fn sync_batch(
    store: &dyn DocumentStore,
    postings: &[PostingRecord],
    profiles: &[ProfileRecord],
) -> Result<(), AppError> {
    store.clear(DocKind::Posting).await?;
    store.clear(DocKind::Profile).await?;

    for p in postings {
        let id = doc_id(&p.title)?;
        store.put(DocKind::Posting, &id, &render_posting(p)).await?;
        debug!(record = p.id, id = %id, "synced posting");
    }
    for p in profiles {
        let id = doc_id(&p.name)?;
        store.put(DocKind::Profile, &id, &render_profile(p)).await?;
        debug!(record = p.id, id = %id, "synced profile");
    }

    info!(
        postings = postings.len(),
        profiles = profiles.len(),
        "synced live data into document store"
    );
    Ok(())
}

/// Derives a store id from a display name: keeps word characters, spaces,
/// and separators, then appends the `.txt` extension.
fn doc_id(name: &str) -> Result<String, AppError> {
    let cleaned: String = name
        .trim()
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_' | '.'))
        .collect();
    let cleaned = cleaned.trim().trim_start_matches('.');
    if cleaned.is_empty() {
        return Err(AppError::Validation(format!(
            "cannot derive a document id from '{name}'"
        )));
    }
    Ok(format!("{cleaned}.txt"))
}

fn render_posting(p: &PostingRecord) -> String {
    format!(
        "JOB TITLE: {}\nCOMPANY: {}\nLOCATION: {}\nABOUT US:\n{}\nJOB DESCRIPTION:\n{}\nRESPONSIBILITIES:\n{}\nQUALIFICATIONS:\n{}\n",
        p.title,
        p.company,
        p.location.as_deref().unwrap_or(""),
        p.about.as_deref().unwrap_or(""),
        p.job_description.as_deref().unwrap_or(""),
        p.responsibilities.as_deref().unwrap_or(""),
        p.qualifications.as_deref().unwrap_or(""),
    )
}

fn render_profile(p: &ProfileRecord) -> String {
    format!(
        "NAME: {}\nPROFILE:\n{}\nEXPERIENCE:\n{}\nEDUCATION:\n{}\nSKILLS:\n{}\nEXTRACURRICULARS:\n{}\nPREFERENCES:\n{}\n",
        p.name,
        p.profile.as_deref().unwrap_or(""),
        p.experience.as_deref().unwrap_or(""),
        p.education.as_deref().unwrap_or(""),
        p.skills.as_deref().unwrap_or(""),
        p.extracurricular.as_deref().unwrap_or(""),
        p.preferences.as_deref().unwrap_or(""),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryDocumentStore;

    fn posting(title: &str) -> PostingRecord {
        PostingRecord {
            id: 1,
            title: title.to_string(),
            company: "Acme".to_string(),
            location: Some("Helsinki".to_string()),
            about: None,
            job_description: Some("Build things".to_string()),
            responsibilities: None,
            qualifications: Some("Rust".to_string()),
        }
    }

    fn profile(name: &str) -> ProfileRecord {
        ProfileRecord {
            id: 7,
            name: name.to_string(),
            profile: Some("Engineer".to_string()),
            experience: None,
            education: Some("BSc".to_string()),
            skills: Some("Rust, SQL".to_string()),
            extracurricular: None,
            preferences: None,
        }
    }

    #[test]
    fn test_doc_id_appends_extension() {
        assert_eq!(doc_id("Financial Analyst").unwrap(), "Financial Analyst.txt");
    }

    #[test]
    fn test_doc_id_strips_path_characters() {
        assert_eq!(doc_id("../evil/name").unwrap(), "evilname.txt");
    }

    #[test]
    fn test_doc_id_rejects_empty_names() {
        assert!(doc_id("   ").is_err());
        assert!(doc_id("///").is_err());
    }

    #[test]
    fn test_render_posting_uses_labeled_sections() {
        let text = render_posting(&posting("Engineer"));
        assert!(text.starts_with("JOB TITLE: Engineer\n"));
        assert!(text.contains("COMPANY: Acme"));
        assert!(text.contains("QUALIFICATIONS:\nRust"));
        // Absent optional sections still render their header.
        assert!(text.contains("RESPONSIBILITIES:\n"));
    }

    #[test]
    fn test_render_profile_uses_labeled_sections() {
        let text = render_profile(&profile("Sofia Virtanen"));
        assert!(text.starts_with("NAME: Sofia Virtanen\n"));
        assert!(text.contains("SKILLS:\nRust, SQL"));
    }

    #[tokio::test]
    async fn test_sync_batch_replaces_both_corpora() {
        let store = InMemoryDocumentStore::new();
        store
            .put(DocKind::Posting, "stale.txt", "old")
            .await
            .unwrap();

        sync_batch(&store, &[posting("Engineer")], &[profile("Sofia")])
            .await
            .unwrap();

        assert_eq!(
            store.list(DocKind::Posting).await.unwrap(),
            ["Engineer.txt"]
        );
        assert_eq!(store.list(DocKind::Profile).await.unwrap(), ["Sofia.txt"]);
        let text = store.get(DocKind::Profile, "Sofia.txt").await.unwrap();
        assert!(text.contains("NAME: Sofia"));
    }

    #[test]
    fn test_request_accepts_upstream_field_names() {
        let req: MatchRequest = serde_json::from_str(
            r#"{
                "postings": [{"ID": 1, "title": "Engineer", "company": "Acme"}],
                "profiles": [{"ID": 2, "Name": "Sofia", "skills": "Rust"}]
            }"#,
        )
        .unwrap();
        assert_eq!(req.postings[0].id, 1);
        assert_eq!(req.profiles[0].name, "Sofia");
        assert_eq!(req.profiles[0].skills.as_deref(), Some("Rust"));
    }
}
