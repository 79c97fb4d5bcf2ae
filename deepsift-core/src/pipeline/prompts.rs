//! Prompt templates for the fast LLM.

/// Asks for several search-engine rewrites of a question, one per line.
pub const REWRITE_PROMPT_MULTI: &str = "\
Please convert the initial user question into 2-3 more appropriate short and pointed search queries \
for retrieval from a document store. Particularly, try to think about resolving ambiguities and make \
the search queries more specific, enabling the system to search more broadly.
Also, try to make the search queries not redundant, i.e. not too similar!

Here is the initial question:
-------
{question}
-------

Formulate the queries separated by newlines (Do not say 'Query 1: ...', just write the querytext) as follows:
<query 1>
<query 2>
...
queries:";

/// Asks whether a document helps answer a question; answered with yes or no.
pub const VERIFIER_PROMPT: &str = "\
Determine whether the following document text contains data or information that is potentially \
relevant for a question. It does not have to be fully relevant, but check whether it has some \
information that would help - possibly in conjunction with other documents - to address the question.

Be careful that you do not use a document where you are not sure whether the text applies to the \
objects or entities that are relevant for the question. For example, a book about chess could have \
a chapter about pawns, but a question about pawns in a corporate setting is a different subject.

DOCUMENT TEXT:
-------
{document_content}
-------

Do you think that this document text is useful and relevant to answer the following question?

QUESTION:
-------
{question}
-------

Please answer with exactly and only a 'yes' or 'no'. Do NOT include any other text in your response:

Answer:";

/// Fill the rewrite template.
pub fn rewrite_prompt(question: &str) -> String {
    REWRITE_PROMPT_MULTI.replace("{question}", question)
}

/// Fill the verification template.
pub fn verifier_prompt(question: &str, document_content: &str) -> String {
    // Substitute the question last so document text that happens to contain
    // "{question}" is left alone.
    VERIFIER_PROMPT
        .replace("{document_content}", document_content)
        .replacen("-------\n{question}\n-------", &format!("-------\n{question}\n-------"), 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rewrite_prompt_embeds_question() {
        let prompt = rewrite_prompt("What is the refund policy?");
        assert!(prompt.contains("What is the refund policy?"));
        assert!(!prompt.contains("{question}"));
    }

    #[test]
    fn test_verifier_prompt_embeds_both_fields() {
        let prompt = verifier_prompt("Which carrier?", "We ship with DHL.");
        assert!(prompt.contains("Which carrier?"));
        assert!(prompt.contains("We ship with DHL."));
        assert!(!prompt.contains("{document_content}"));
    }

    #[test]
    fn test_verifier_prompt_leaves_document_placeholders() {
        let prompt = verifier_prompt("q", "literal {question} in text");
        assert!(prompt.contains("literal {question} in text"));
    }
}
