//! Assistant instructions built from the page the user is viewing

use crate::browser::PageContext;
use std::fmt::Write;

/// Base instructions establishing the assistant's role
const BASE_INSTRUCTIONS: &str = r"You are a helpful assistant embedded in the user's browser. You answer questions about the page they are currently viewing.

Be concise. Quote the page when it helps.

You can act on the page with the fill_input and click_element functions. Identify elements with CSS selectors taken from the page markup below. Only act when the user asks you to; say briefly what you are about to do.";

/// Appended when the user has to confirm every action
const CONFIRMATION_SUFFIX: &str = r"

Each function call is shown to the user, who decides whether to run it. Do not assume a call ran until you receive its result.";

/// Build the instructions for a turn about `page`.
pub fn build_instructions(page: &PageContext, auto_execute: bool) -> String {
    let mut instructions = String::from(BASE_INSTRUCTIONS);

    instructions.push_str("\n\n<current_page>\n");
    let _ = writeln!(instructions, "Title: {}", page.title);
    let _ = writeln!(instructions, "URL: {}", page.url);
    if !page.html.is_empty() {
        instructions.push_str("<html>\n");
        instructions.push_str(&page.html);
        if !page.html.ends_with('\n') {
            instructions.push('\n');
        }
        instructions.push_str("</html>\n");
    }
    instructions.push_str("</current_page>");

    if !auto_execute {
        instructions.push_str(CONFIRMATION_SUFFIX);
    }

    instructions
}
