//! Fenced code block extraction from oracle replies.
//!
//! Recognised grammar, line oriented:
//!
//! ```text
//! block   := open body close
//! open    := ws? "`"{n>=3} info? EOL        info has no backticks
//! body    := any lines
//! close   := ws? "`"{m>=n} ws? EOL
//! ```
//!
//! Text outside the block is ignored. A reply must contain exactly one block;
//! a reply without any block is rejected rather than taken as raw code.
//! Fence lines may end in CRLF; body line endings are returned as received.

use crate::errors::GenerationError;

/// One parsed fenced block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeBlock {
    /// Info string after the opening fence (`cpp`, `arduino`, ...), if any.
    pub language: Option<String>,
    pub body: String,
}

struct Open {
    width: usize,
    line: usize,
    language: Option<String>,
    body: Vec<String>,
}

/// Width of an opening fence and its info string, if `line` opens a block.
fn opening_fence(line: &str) -> Option<(usize, Option<String>)> {
    let trimmed = line.trim_start();
    let width = trimmed.chars().take_while(|&c| c == '`').count();
    if width < 3 {
        return None;
    }
    let info = trimmed[width..].trim();
    if info.contains('`') {
        return None;
    }
    let language = (!info.is_empty()).then(|| info.to_string());
    Some((width, language))
}

fn closes(line: &str, width: usize) -> bool {
    let trimmed = line.trim();
    trimmed.len() >= width && trimmed.chars().all(|c| c == '`')
}

/// Parse every fenced block in `reply`.
pub fn code_blocks(reply: &str) -> Result<Vec<CodeBlock>, GenerationError> {
    let mut blocks = Vec::new();
    let mut open: Option<Open> = None;

    for (idx, line) in reply.split('\n').enumerate() {
        let closing = matches!(open.as_ref(), Some(current) if closes(line, current.width));
        if closing {
            if let Some(done) = open.take() {
                let mut body = done.body.join("\n");
                // The last body line's `\r` belongs to the line ending before the fence.
                if body.ends_with('\r') {
                    body.pop();
                }
                blocks.push(CodeBlock {
                    language: done.language,
                    body,
                });
            }
            continue;
        }

        if let Some(current) = open.as_mut() {
            current.body.push(line.to_string());
        } else if let Some((width, language)) = opening_fence(line) {
            open = Some(Open {
                width,
                line: idx + 1,
                language,
                body: Vec::new(),
            });
        }
    }

    if let Some(unclosed) = open {
        return Err(GenerationError::UnterminatedCodeBlock(unclosed.line));
    }
    Ok(blocks)
}

/// Extract the single code artifact from an oracle reply.
///
/// Returns the block body without fences or language tag. Fails when the
/// reply has zero or several blocks, the block is blank, or the body still
/// contains a triple-backtick sequence.
pub fn extract_code(reply: &str) -> Result<String, GenerationError> {
    let mut blocks = code_blocks(reply)?;
    let block = match blocks.len() {
        0 => return Err(GenerationError::NoCodeBlock),
        1 => blocks.remove(0),
        n => return Err(GenerationError::MultipleCodeBlocks(n)),
    };

    if block.body.trim().is_empty() {
        return Err(GenerationError::EmptyCodeBlock);
    }
    if block.body.contains("```") {
        return Err(GenerationError::ResidualFence);
    }
    Ok(block.body)
}
