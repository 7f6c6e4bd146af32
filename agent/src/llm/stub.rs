//! Deterministic offline model backend.
//!
//! Keeps the loop runnable without network access or credentials: returns a
//! canned CAD macro keyed off recognizable prompt sections, and an accepting
//! verdict for review prompts. Useful for local development and as the
//! default provider in tests.

use std::path::PathBuf;

use tracing::debug;

use super::{ChatMessage, ModelClient, ProviderError};

#[derive(Debug, Default)]
pub struct StubModelClient;

const DEFAULT_MACRO: &str = "import FreeCAD as App\n\
import Part\n\
doc = App.newDocument('AgentModel')\n\
box = Part.makeBox(10, 20, 30)\n\
part_obj = doc.addObject('Part::Feature', 'GeneratedBlock')\n\
part_obj.Shape = box\n\
doc.recompute()\n\
print('Model generated successfully')";

const ASSEMBLY_MACRO: &str = "import FreeCAD as App\n\
doc = App.newDocument('AssemblyDoc')\n\
doc.recompute()\n\
print('Assembly placeholder created')";

impl ModelClient for StubModelClient {
    fn complete(
        &self,
        messages: &[ChatMessage],
        _images: &[PathBuf],
    ) -> Result<String, ProviderError> {
        let prompt: String = messages
            .iter()
            .map(|message| format!("{}: {}\n", message.role, message.content))
            .collect();
        debug!(bytes = prompt.len(), "stub client received prompt");
        let lowered = prompt.to_lowercase();

        if lowered.contains("<render_review>") {
            return Ok(
                r#"{"acceptable": true, "needs_additional_views": false, "feedback": "Rendered projections inspected in stub mode."}"#
                    .to_string(),
            );
        }
        if lowered.contains("assembly") || lowered.contains("сборк") {
            return Ok(fenced(ASSEMBLY_MACRO));
        }
        if lowered.contains("<failure>") {
            let repaired = format!("{DEFAULT_MACRO}\nprint('Applied fix for previous error')");
            return Ok(fenced(&repaired));
        }
        Ok(fenced(DEFAULT_MACRO))
    }

    fn supports_images(&self) -> bool {
        true
    }
}

fn fenced(script: &str) -> String {
    format!("```python\n{script}\n```")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::extract::extract_script;

    #[test]
    fn returns_extractable_macro() {
        let client = StubModelClient;
        let response = client
            .complete(&[ChatMessage::user("make a bracket")], &[])
            .expect("response");
        let script = extract_script(&response).expect("script");
        assert!(script.contains("doc.recompute()"));
    }

    #[test]
    fn failure_context_switches_to_repair_template() {
        let client = StubModelClient;
        let response = client
            .complete(
                &[ChatMessage::user("<failure>NameError: Part</failure>")],
                &[],
            )
            .expect("response");
        assert!(response.contains("Applied fix for previous error"));
    }

    #[test]
    fn review_prompts_get_an_accepting_verdict() {
        let client = StubModelClient;
        let response = client
            .complete(&[ChatMessage::user("<render_review>views</render_review>")], &[])
            .expect("response");
        let verdict = crate::core::verdict::parse_verdict(&response);
        assert!(verdict.is_acceptable());
    }
}
