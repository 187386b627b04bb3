//! Prompt construction and response parsing for agenda summarization.
//!
//! One canonical prompt for meeting packets (optionally prefixed with the
//! chunk-position instruction), a variant for per-item attachments, and a
//! matter prompt that stitches an item's history together. Responses end
//! with a `Topics:` line that is parsed off into tags.

/// Ceiling on extracted text shipped to the model, in characters. Chunking
/// keeps PDFs under the request caps; this guards pathological text layers.
const MAX_PROMPT_TEXT_CHARS: usize = 180_000;

/// Canonical meeting-packet prompt. `chunk_prefix` is empty for
/// single-chunk documents.
pub fn meeting_prompt(city_name: &str, meeting_title: &str, chunk_prefix: &str, text: &str) -> String {
    let mut prompt = String::new();
    if !chunk_prefix.is_empty() {
        prompt.push_str(chunk_prefix);
        prompt.push_str("\n\n");
    }
    prompt.push_str(&format!(
        "You are summarizing a municipal meeting agenda packet for residents of {city_name}.\n\
         Meeting: {meeting_title}\n\n\
         Summarize the significant business in plain language: what is being decided, \
         who is affected, dollar amounts, addresses, and deadlines. Skip procedural \
         boilerplate (roll call, pledge, approval of minutes) unless contested.\n\n\
         End with a single line starting with \"Topics:\" listing 3-6 lowercase tags \
         separated by commas.\n\n\
         --- DOCUMENT TEXT ---\n"
    ));
    prompt.push_str(truncate_text(text));
    prompt
}

/// Prompt for a single agenda item attachment.
pub fn item_prompt(city_name: &str, item_title: &str, attachment_name: &str, text: &str) -> String {
    let mut prompt = format!(
        "You are summarizing one attachment from a municipal agenda item for residents of {city_name}.\n\
         Agenda item: {item_title}\n\
         Attachment: {attachment_name}\n\n\
         Summarize what this document proposes or reports in plain language, \
         keeping every concrete figure, address, and date.\n\n\
         --- DOCUMENT TEXT ---\n"
    );
    prompt.push_str(truncate_text(text));
    prompt
}

/// Prompt for a recurring matter, given its per-appearance summaries.
pub fn matter_prompt(city_name: &str, matter_number: &str, title: &str, sections: &[String]) -> String {
    let mut prompt = format!(
        "You are tracking legislative matter {matter_number} (\"{title}\") in {city_name} \
         across meetings.\n\n\
         Write a short history of this matter: what it does, how it has moved, and its \
         current status. Base it only on the appearance notes below.\n\n"
    );
    for (i, section) in sections.iter().enumerate() {
        prompt.push_str(&format!("--- APPEARANCE {} ---\n{section}\n\n", i + 1));
    }
    prompt
}

fn truncate_text(text: &str) -> &str {
    match text.char_indices().nth(MAX_PROMPT_TEXT_CHARS) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}

/// Split a completion into (summary, topic tags). The `Topics:` line is
/// removed from the summary; a response without one yields no tags.
pub fn parse_summary_response(response: &str) -> (String, Vec<String>) {
    let mut topics = Vec::new();
    let mut summary_lines = Vec::new();

    for line in response.lines() {
        let trimmed = line.trim();
        if let Some(rest) = trimmed
            .strip_prefix("Topics:")
            .or_else(|| trimmed.strip_prefix("topics:"))
        {
            topics = rest
                .split(',')
                .map(|tag| tag.trim().to_lowercase())
                .filter(|tag| !tag.is_empty())
                .collect();
        } else {
            summary_lines.push(line);
        }
    }

    (summary_lines.join("\n").trim().to_string(), topics)
}
