// Prompt templates for the three evaluator pipelines. Placeholders are
// substituted with `str::replace`; each pipeline's scan/prepare stage owns
// the substitution.

/// Wraps one candidate document in explicit delimiters keyed by its id.
/// The markers are assumed not to occur inside document bodies; a document
/// that embeds them can bleed into a neighbour in the composed prompt.
pub fn document_block(label: &str, id: &str, text: &str) -> String {
    format!("\n\n--- START OF {label}: {id} ---\n{text}\n--- END OF {label}: {id} ---")
}

/// Output contract shared by both scan prompts: a bracketed, quoted,
/// best-first list of ids and nothing else.
const LIST_OUTPUT_RULE: &str = "\
Respond with ONLY a list of the chosen filenames, best first, formatted \
like: ['first_choice.txt', 'second_choice.txt']. \
If nothing qualifies, respond with exactly [].";

const RECRUITER_SCAN_TEMPLATE: &str = "\
You are a recruiter agent. Your goal is to find suitable candidates for a job.

Here is your job posting:
---MY JOB POSTING---
{posting}
---END MY JOB POSTING---

Here are all the available candidate profiles:
---ALL PROFILES---
{profiles}
---END ALL PROFILES---

Follow these steps precisely:
1.  **Analyze Posting:** Determine the posting's primary functional category
    (e.g. 'Software Engineer', 'Financial Analyst').
2.  **Filter Profiles:** Keep only candidates whose own primary job function,
    based on their education, skills, and projects, strictly matches that
    category. You MUST NOT suggest a cross-category candidate.
3.  **Rank:** From the filtered candidates only, pick the top {max_picks}
    most suitable, best first. If no candidate is suitable, pick no one.
4.  **Format Output:** {list_rule}";

const CANDIDATE_SCAN_TEMPLATE: &str = "\
You are a meticulous job-seeking agent. Your task is to find the *most
relevant* jobs for your candidate and filter out all irrelevant ones.

Here is your candidate's profile:
---MY PROFILE---
{profile}
---END MY PROFILE---

Here are all the available job postings:
---ALL POSTINGS---
{postings}
---END ALL POSTINGS---

Follow these steps precisely:
1.  **Analyze Profile:** Determine the candidate's primary job function and
    field of interest based on their education, skills, and projects.
2.  **Filter Postings:** Keep only jobs that strictly match this primary job
    function. You MUST ignore postings that do not align with the
    candidate's clear career path; do NOT suggest a 'Customer Service' job
    to a 'Software Engineer' candidate.
3.  **Rank:** From the filtered list only, pick the top {max_picks} most
    suitable postings, best first.
4.  **Format Output:** {list_rule}";

const JUDGE_TEMPLATE: &str = "\
You are the final Judge. You have received a list of mutual matches for a
job posting. Your task is to perform a final, detailed analysis for *each*
matched candidate and decide who is the best fit.

--- JOB POSTING ---
{posting}
--- END JOB POSTING ---

--- MUTUALLY MATCHED CANDIDATES ---
{candidates}
--- END CANDIDATES ---

Please provide a detailed final assessment. Follow this structure:
1.  **Overall Summary:** State how many candidates were analyzed.
2.  **Candidate Rankings:** A full strict ranking of *every* matched
    candidate by filename, Rank 1 first. Do not stop at a top pick.
3.  **Detailed Justification:** For *each* candidate, 2-3 sentences
    comparing their strengths and weaknesses directly against the job
    requirements. Treat a candidate lacking more than one listed
    qualification as disqualified, whatever their other merits.";

pub fn recruiter_scan_prompt(posting_text: &str, profiles_block: &str, max_picks: usize) -> String {
    RECRUITER_SCAN_TEMPLATE
        .replace("{posting}", posting_text)
        .replace("{profiles}", profiles_block)
        .replace("{max_picks}", &max_picks.to_string())
        .replace("{list_rule}", LIST_OUTPUT_RULE)
}

pub fn candidate_scan_prompt(profile_text: &str, postings_block: &str, max_picks: usize) -> String {
    CANDIDATE_SCAN_TEMPLATE
        .replace("{profile}", profile_text)
        .replace("{postings}", postings_block)
        .replace("{max_picks}", &max_picks.to_string())
        .replace("{list_rule}", LIST_OUTPUT_RULE)
}

pub fn judge_prompt(posting_text: &str, candidates_block: &str) -> String {
    JUDGE_TEMPLATE
        .replace("{posting}", posting_text)
        .replace("{candidates}", candidates_block)
}
