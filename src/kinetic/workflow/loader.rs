// SPDX-License-Identifier: MIT

//! Canvas loading from JSON or YAML files

use super::types::Canvas;
use crate::adk::error::FlowError;
use std::fs;
use std::path::Path;

/// Reads canvas documents; `.yaml`/`.yml` files are YAML, anything else JSON
pub struct CanvasLoader;

impl CanvasLoader {
    pub fn new() -> Self {
        Self
    }

    pub fn load_canvas<P: AsRef<Path>>(&self, path: P) -> Result<Canvas, FlowError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let is_yaml = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"));
        log::debug!("Loading canvas from {}", path.display());
        if is_yaml {
            Self::parse_yaml(&content)
        } else {
            Self::parse_json(&content)
        }
    }

    pub fn parse_json(content: &str) -> Result<Canvas, FlowError> {
        Canvas::from_json(content)
    }

    pub fn parse_yaml(content: &str) -> Result<Canvas, FlowError> {
        Ok(serde_yaml::from_str(content)?)
    }
}

impl Default for CanvasLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kinetic::workflow::types::BlockInput;

    const YAML: &str = r#"
nodes:
  - id: entry
    type: entry
    data:
      outputs:
        - name: query
          type: string
          required: true
  - id: exit
    type: exit
    data:
      inputs:
        inputParameters:
          - name: answer
            input:
              type: ref
              blockID: entry
              path: query
edges:
  - sourceNodeID: entry
    targetNodeID: exit
"#;

    #[test]
    fn test_parse_yaml_canvas() {
        let canvas = CanvasLoader::parse_yaml(YAML).unwrap();
        assert_eq!(canvas.nodes.len(), 2);
        assert_eq!(canvas.edges[0].target_node_id, "exit");
        let param = &canvas.nodes[1].data.inputs.input_parameters[0];
        assert_eq!(
            param.input,
            BlockInput::Ref {
                block_id: "entry".to_string(),
                path: "query".to_string()
            }
        );
    }

    #[test]
    fn test_yaml_and_json_agree() {
        let from_yaml = CanvasLoader::parse_yaml(YAML).unwrap();
        let json = from_yaml.to_json().unwrap();
        assert_eq!(CanvasLoader::parse_json(&json).unwrap(), from_yaml);
    }

    #[test]
    fn test_load_by_extension() {
        let dir = std::env::temp_dir().join(format!("kinetic-loader-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        let yaml_path = dir.join("canvas.yml");
        fs::write(&yaml_path, YAML).unwrap();
        let canvas = CanvasLoader::new().load_canvas(&yaml_path).unwrap();

        let json_path = dir.join("canvas.json");
        fs::write(&json_path, canvas.to_json().unwrap()).unwrap();
        assert_eq!(CanvasLoader::new().load_canvas(&json_path).unwrap(), canvas);

        fs::write(&json_path, "nodes: []").unwrap();
        assert!(matches!(
            CanvasLoader::new().load_canvas(&json_path),
            Err(FlowError::Json(_))
        ));
        assert!(matches!(
            CanvasLoader::new().load_canvas(dir.join("missing.json")),
            Err(FlowError::Io(_))
        ));
        fs::remove_dir_all(&dir).unwrap();
    }
}
