//! Prompt templates shared by the techniques.
//!
//! Kept in one place so wording changes never hide inside control flow.

use raglab_core::RetrievedChunk;

/// Default system prompt for grounded answer generation.
pub const ANSWER_SYSTEM: &str = "You are a question answering assistant. Answer the user's \
question using only the provided documents. If the documents do not contain the answer, say so \
explicitly.";

/// User message for grounded answer generation: numbered contexts + question.
pub fn answer_user(query: &str, chunks: &[RetrievedChunk]) -> String {
    let mut context = String::new();
    for (i, chunk) in chunks.iter().enumerate() {
        context.push_str(&format!("[Document {}]\n{}\n\n", i + 1, chunk.text));
    }
    if context.is_empty() {
        context.push_str("(no documents retrieved)\n\n");
    }
    format!("Question: {query}\n\nReference documents:\n{context}Answer the question based on the documents above.")
}

pub const HYDE_SYSTEM: &str = "You write short, plausible reference passages. Given a question, \
write one paragraph that could appear in a document answering it. Include likely terminology. Do \
not address the reader and do not explain what you are doing.";

pub fn hyde_user(query: &str) -> String {
    format!("Question: {query}\n\nWrite the hypothetical answer paragraph:")
}

pub const REWRITE_SYSTEM: &str = "You optimize search queries. Rewrite the user's query to be \
more specific and detailed, adding terminology that helps retrieval. Keep it concise. Output \
only the rewritten query.";

pub fn rewrite_user(query: &str) -> String {
    format!("Original query: {query}\n\nRewritten query:")
}

pub const STEPBACK_SYSTEM: &str = "You optimize search strategies. Turn the user's specific \
query into one broader, more general query that would retrieve useful background material. \
Output only the broader query.";

pub fn stepback_user(query: &str) -> String {
    format!("Original query: {query}\n\nBroader query:")
}

pub const DECOMPOSE_SYSTEM: &str = "You break complex questions into simpler sub-questions. \
Each sub-question focuses on a different aspect of the original.";

pub fn decompose_user(query: &str, n: usize) -> String {
    format!(
        "Decompose the following query into {n} simpler sub-questions, one per line, numbered:\n\
         1. [first sub-question]\n2. [second sub-question]\n…\n\nQuery: {query}"
    )
}

pub const CLASSIFY_SYSTEM: &str = "You classify search queries. Assign the query to exactly one \
of these categories:\n\
- factual: asks for specific, verifiable information\n\
- analytical: needs synthesis or in-depth explanation\n\
- opinion: subjective, seeks viewpoints\n\
- contextual: depends on the user's specific situation\n\
Reply with the category name only.";

pub fn classify_user(query: &str) -> String {
    format!("Classify this query: {query}")
}

pub const RERANK_SYSTEM: &str = "You rate how relevant a passage is to a query on a 0-10 scale: \
10 means the passage directly answers the query, 0 means it is unrelated. Reply with a single \
number from 0 to 10.";

pub fn rerank_user(query: &str, passage: &str) -> String {
    format!("Query: {query}\n\nPassage:\n{passage}\n\nRelevance score (0-10):")
}

pub const RETRIEVAL_DECISION_SYSTEM: &str = "You decide whether a query needs document \
retrieval. Answer \"yes\" for factual questions and requests for specific information about \
events, people or concepts. Answer \"no\" for greetings, opinions, hypotheticals and simple \
common-sense questions. Reply with only yes or no.";

pub fn retrieval_decision_user(query: &str) -> String {
    format!("Query: {query}\n\nDoes this query require document retrieval?")
}

pub const RELEVANCE_SYSTEM: &str = "You judge whether a document helps answer a query. Reply \
with exactly one of: fully_relevant, partially_relevant, not_relevant.";

pub fn relevance_user(query: &str, passage: &str) -> String {
    format!("Query: {query}\n\nDocument:\n{passage}\n\nRelevance:")
}

pub const SUPPORT_SYSTEM: &str = "You judge whether an answer is supported by a context. Reply \
with exactly one of:\n\
- fully: every claim in the answer follows from the context\n\
- partially: some claims follow from the context\n\
- none: the answer is not supported by the context";

pub fn support_user(answer: &str, context: &str) -> String {
    format!("Context:\n{context}\n\nAnswer:\n{answer}\n\nSupport level:")
}

pub const UTILITY_SYSTEM: &str = "You rate how useful an answer is for a query, considering \
accuracy, completeness and helpfulness. Use a 1-5 scale where 1 is useless and 5 is extremely \
useful. Reply with a single digit from 1 to 5.";

pub fn utility_user(query: &str, answer: &str) -> String {
    format!("Query: {query}\n\nAnswer:\n{answer}\n\nUsefulness (1-5):")
}

pub const DIRECT_ANSWER_SYSTEM: &str = "You are a helpful assistant. Give a clear, accurate and \
informative answer to the question.";

pub fn direct_answer_user(query: &str) -> String {
    format!("Question: {query}\n\nAnswer the question as well as you can.")
}

pub fn grounded_candidate_user(query: &str, context: &str) -> String {
    format!(
        "Use the following context to answer the question.\n\nContext:\n{context}\n\n\
         Question: {query}\n\nAnswer based on the context provided."
    )
}
