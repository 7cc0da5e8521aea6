//! Prompt templates for both evaluation tracks.

/// Shared framing for the dimensional judge: one dimension per call,
/// a single 0–10 number expected back.
pub fn dimension_system(criterion: &str, scale: &str) -> String {
    format!(
        "You are a strict answer quality judge. Rate the {criterion} of the answer.\n\
         Scoring guide (0-10):\n{scale}\n\
         Reply with a single number from 0 to 10 followed by one sentence of justification."
    )
}

pub const RELEVANCE_SCALE: &str = "- 10: fully answers the question\n\
- 7-9: answers the main part of the question\n\
- 4-6: partially answers the question\n\
- 1-3: barely addresses the question\n\
- 0: unrelated to the question";

pub const FAITHFULNESS_SCALE: &str = "- 10: entirely grounded in the provided context\n\
- 7-9: mostly grounded, minor reasonable inference\n\
- 4-6: mixes context with outside knowledge\n\
- 1-3: mostly not grounded in the context\n\
- 0: contradicts or ignores the context";

pub const COHERENCE_SCALE: &str = "- 10: perfectly structured and logically consistent\n\
- 7-9: clear structure, minor rough edges\n\
- 4-6: understandable but loosely organized\n\
- 1-3: hard to follow\n\
- 0: incoherent";

pub const FLUENCY_SCALE: &str = "- 10: flawless, natural language\n\
- 7-9: fluent with small blemishes\n\
- 4-6: readable but awkward in places\n\
- 1-3: difficult to read\n\
- 0: unreadable";

pub const CONCISENESS_SCALE: &str = "- 10: no redundancy at all\n\
- 7-9: mostly tight, a little repetition\n\
- 4-6: noticeably padded\n\
- 1-3: heavily redundant\n\
- 0: rambling";

pub const CORRECTNESS_SCALE: &str = "- 10: matches or improves on the reference answer\n\
- 7-9: consistent with the reference, small gaps\n\
- 4-6: partially correct\n\
- 1-3: mostly incorrect\n\
- 0: entirely wrong";

pub fn relevance_user(query: &str, answer: &str) -> String {
    format!("Question: {query}\n\nAnswer: {answer}\n\nRelevance score (0-10):")
}

pub fn faithfulness_user(answer: &str, context: &str) -> String {
    format!("Context:\n{context}\n\nAnswer: {answer}\n\nFaithfulness score (0-10):")
}

pub fn standalone_user(criterion: &str, answer: &str) -> String {
    format!("Answer: {answer}\n\n{criterion} score (0-10):")
}

pub fn correctness_user(answer: &str, reference: &str) -> String {
    format!("Reference answer: {reference}\n\nAnswer under review: {answer}\n\nCorrectness score (0-10):")
}

// ── Reference metrics ──────────────────────────────────────────────

pub const CLAIMS_SYSTEM: &str = "You extract atomic factual claims from a text. Each claim is a \
single verifiable statement. List the claims one per line, numbered. If the text makes no \
factual claims, reply with the single word: none.";

pub fn claims_user(text: &str) -> String {
    format!("Text:\n{text}\n\nAtomic claims:")
}

pub const CLAIM_SUPPORT_SYSTEM: &str = "You verify whether a claim follows from a context. \
Reply with only yes or no.";

pub fn claim_support_user(claim: &str, context: &str) -> String {
    format!("Context:\n{context}\n\nClaim: {claim}\n\nIs the claim supported by the context?")
}

pub const BACK_QUESTIONS_SYSTEM: &str = "You reverse-engineer questions from an answer. Write \
questions that this answer would directly answer, one per line, numbered.";

pub fn back_questions_user(answer: &str, n: usize) -> String {
    format!("Answer:\n{answer}\n\nWrite {n} questions this answer responds to:")
}

pub const CONTEXT_USEFUL_SYSTEM: &str = "You judge whether a context passage is useful for \
arriving at a reference answer. Reply with only yes or no.";

pub fn context_useful_user(context: &str, reference: &str) -> String {
    format!(
        "Reference answer:\n{reference}\n\nContext passage:\n{context}\n\nIs this passage useful \
         for arriving at the reference answer?"
    )
}
