//! Prompt assembly for the vision-language generator.
//!
//! The layout follows the LLaVA-1.5 chat convention and must stay byte-stable:
//! generator behaviour is compared across runs, so any change here changes results.

/// Chat role marker opening the user turn.
pub const USER_MARKER: &str = "USER:";

/// Marker that opens the assistant turn; also used to cut answers out of transcripts.
pub const ASSISTANT_MARKER: &str = "ASSISTANT:";

/// Placeholder token standing for one image in the prompt.
pub const IMAGE_TOKEN: &str = "<image>";

const INSTRUCTION: &str = "Use the following information to answer the question.";
const QUESTION_LABEL: &str = "Question:";
const CLOSING_INSTRUCTION: &str =
    "Answer with ONLY the final answer. Do NOT include explanations, descriptions, or extra text.";

/// Render the prompt for `question` with the retrieved texts (highest score
/// first) and `num_images` image placeholders.
pub fn build_prompt<S: AsRef<str>>(question: &str, retrieved_texts: &[S], num_images: usize) -> String {
    let image_tokens = IMAGE_TOKEN.repeat(num_images);
    let context = retrieved_texts
        .iter()
        .map(|t| format!("- {}", t.as_ref().trim()))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "{USER_MARKER} {image_tokens}\n\
         {INSTRUCTION}\n\n\
         {context}\n\n\
         {QUESTION_LABEL} {question}\n\n\
         {CLOSING_INSTRUCTION}\n\
         {ASSISTANT_MARKER}"
    )
}

/// Number of image placeholders in a rendered prompt.
pub fn count_image_tokens(prompt: &str) -> usize {
    prompt.matches(IMAGE_TOKEN).count()
}
