use gridrag_core::types::RiskLevel;

const CONTRACT: &str = "\
You answer questions for electric utility staff using only the numbered context sources provided.
Rules:
1. Use only facts stated in the context. Do not rely on outside knowledge.
2. Cite every factual sentence with the label of its source, for example [S1] or [S1, S3].
3. Only cite labels that appear in the context.
4. If the context does not answer the question, say that the information is not specified in the provided context.";

const SAFETY_RULE: &str = "\
5. This is a safety-critical question. State the safety warnings, protective equipment and isolation steps from the context first, before any other detail.";

/// Instruction contract handed to the generator.
pub fn instructions(risk: RiskLevel) -> String {
    if risk >= RiskLevel::High {
        format!("{CONTRACT}\n{SAFETY_RULE}")
    } else {
        CONTRACT.to_string()
    }
}
