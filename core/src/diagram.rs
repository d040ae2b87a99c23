//! Seam between the dependency graph description and whatever turns it into
//! text for the topology view.

use crate::graph::EDGE_ARROW;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    #[error("diagram description must start with a `graph` header")]
    MissingHeader,

    #[error("malformed edge on line {line}: {reason}")]
    MalformedEdge { line: usize, reason: String },

    #[error("diagram backend failed: {0}")]
    Backend(String),
}

/// Turns a `graph LR` description into displayable text.
///
/// An empty result means there was nothing to draw.
pub trait DiagramRenderer: Send + Sync {
    fn render(&self, description: &str) -> Result<String, RenderError>;
}

/// Renders each dependency path on its own line: `web ─[1]→ api ─[2]→ db`
#[derive(Debug, Clone, Copy, Default)]
pub struct LineRenderer;

impl DiagramRenderer for LineRenderer {
    fn render(&self, description: &str) -> Result<String, RenderError> {
        let mut lines = description
            .lines()
            .enumerate()
            .map(|(idx, line)| (idx + 1, line.trim()))
            .filter(|(_, line)| !line.is_empty());

        match lines.next() {
            Some((_, header)) if header == "graph" || header.starts_with("graph ") => {}
            _ => return Err(RenderError::MissingHeader),
        }

        let mut rendered = Vec::new();
        for (line_no, line) in lines {
            let (head, hops) = parse_path(line).map_err(|reason| RenderError::MalformedEdge {
                line: line_no,
                reason,
            })?;
            let mut text = head.to_string();
            for (count, target) in hops {
                text.push_str(&format!(" ─[{count}]→ {target}"));
            }
            rendered.push(text);
        }

        Ok(rendered.join("\n"))
    }
}

fn parse_path(line: &str) -> Result<(&str, Vec<(usize, &str)>), String> {
    let separator = format!(" {EDGE_ARROW}|");
    let mut parts = line.split(separator.as_str());
    let head = parts.next().map(str::trim).unwrap_or_default();
    if head.is_empty() {
        return Err("missing source service".to_string());
    }

    let mut hops = Vec::new();
    for part in parts {
        let (count, target) = part
            .split_once("| ")
            .ok_or_else(|| "unterminated call count".to_string())?;
        let count: usize = count
            .trim()
            .parse()
            .map_err(|_| format!("invalid call count {count:?}"))?;
        let target = target.trim();
        if target.is_empty() {
            return Err("missing target service".to_string());
        }
        hops.push((count, target));
    }

    if hops.is_empty() {
        return Err(format!("expected `{EDGE_ARROW}` in {line:?}"));
    }
    Ok((head, hops))
}
