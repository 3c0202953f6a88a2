use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use roxmltree::{Document, Node};

const DEFAULT_DT: f64 = 0.01;
const DEFAULT_GRAVITY: [f64; 3] = [0.0, -9.81, 0.0];
const DEFAULT_STATE_NAME: &str = "mstate";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLocation {
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SceneErrorCode {
    ReadFile,
    XmlMalformed,
    InvalidRoot,
    MissingAttribute,
    InvalidValue,
    DuplicateComponent,
    MappingWithoutInput,
}

#[derive(Debug, Clone)]
pub struct SceneLoadError {
    pub code: SceneErrorCode,
    pub message: String,
    pub file_path: PathBuf,
    pub location: Option<SourceLocation>,
}

impl fmt::Display for SceneLoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.location {
            Some(loc) => write!(
                f,
                "{:?}: {} (file={}, line={}, column={})",
                self.code,
                self.message,
                self.file_path.display(),
                loc.line,
                loc.column
            ),
            None => write!(
                f,
                "{:?}: {} (file={})",
                self.code,
                self.message,
                self.file_path.display()
            ),
        }
    }
}

impl std::error::Error for SceneLoadError {}

/// Layout of a state object's per-point values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Template {
    Vec1d,
    Vec2d,
    Vec3d,
    /// Position plus quaternion `x y z qx qy qz qw`.
    Rigid3d,
}

impl Template {
    pub fn dof_per_point(self) -> usize {
        match self {
            Self::Vec1d => 1,
            Self::Vec2d => 2,
            Self::Vec3d => 3,
            Self::Rigid3d => 7,
        }
    }

    /// Leading components that move under gravity and mappings.
    pub fn translational_dofs(self) -> usize {
        self.dof_per_point().min(3)
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "Vec1d" => Some(Self::Vec1d),
            "Vec2d" => Some(Self::Vec2d),
            "Vec3d" => Some(Self::Vec3d),
            "Rigid3d" | "Rigid" => Some(Self::Rigid3d),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StateDesc {
    pub name: String,
    pub template: Template,
    pub positions: Vec<f64>,
    pub velocities: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MappingDesc {
    Identity,
    Translation { offset: [f64; 3] },
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeDesc {
    pub name: String,
    pub parent: Option<usize>,
    pub solver: bool,
    pub state: Option<StateDesc>,
    pub mapping: Option<MappingDesc>,
}

/// A parsed scene file. Nodes are stored in document pre-order; node 0 is the root.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneDesc {
    pub dt: f64,
    pub gravity: [f64; 3],
    pub nodes: Vec<NodeDesc>,
}

pub fn load_scene_file(path: &Path) -> Result<SceneDesc, SceneLoadError> {
    let raw = fs::read_to_string(path).map_err(|source| SceneLoadError {
        code: SceneErrorCode::ReadFile,
        message: format!("failed to read scene file: {source}"),
        file_path: path.to_path_buf(),
        location: None,
    })?;
    parse_scene(path, &raw)
}

pub fn parse_scene(file_path: &Path, raw: &str) -> Result<SceneDesc, SceneLoadError> {
    let doc = Document::parse(raw).map_err(|error| SceneLoadError {
        code: SceneErrorCode::XmlMalformed,
        message: format!("malformed XML: {error}"),
        file_path: file_path.to_path_buf(),
        location: Some(SourceLocation {
            line: error.pos().row as usize,
            column: error.pos().col as usize,
        }),
    })?;
    let parser = SceneParser {
        file_path,
        doc: &doc,
    };

    let root = doc.root_element();
    if root.tag_name().name() != "Node" {
        return Err(parser.error_at(
            SceneErrorCode::InvalidRoot,
            "root element must be <Node>".to_string(),
            root,
        ));
    }

    let dt = match root.attribute("dt") {
        Some(raw) => {
            let dt = parser.number(root, "dt", raw)?;
            if dt <= 0.0 {
                return Err(parser.error_at(
                    SceneErrorCode::InvalidValue,
                    "dt must be finite and > 0".to_string(),
                    root,
                ));
            }
            dt
        }
        None => DEFAULT_DT,
    };
    let gravity = match root.attribute("gravity") {
        Some(raw) => parser.vec3(root, "gravity", raw)?,
        None => DEFAULT_GRAVITY,
    };

    let mut nodes = Vec::new();
    parser.parse_node(root, None, &mut nodes)?;
    Ok(SceneDesc { dt, gravity, nodes })
}

struct SceneParser<'a, 'input> {
    file_path: &'a Path,
    doc: &'a Document<'input>,
}

impl SceneParser<'_, '_> {
    fn parse_node(
        &self,
        node: Node<'_, '_>,
        parent: Option<usize>,
        nodes: &mut Vec<NodeDesc>,
    ) -> Result<(), SceneLoadError> {
        let name = self.required_attribute(node, "name")?.to_string();
        let index = nodes.len();
        nodes.push(NodeDesc {
            name,
            parent,
            solver: false,
            state: None,
            mapping: None,
        });

        let mut mapping_element = None;
        for child in node.children().filter(|child| child.is_element()) {
            let tag = child.tag_name().name();
            match tag {
                "Node" => self.parse_node(child, Some(index), nodes)?,
                "MechanicalObject" => {
                    if nodes[index].state.is_some() {
                        return Err(self.error_at(
                            SceneErrorCode::DuplicateComponent,
                            "a node holds at most one <MechanicalObject>".to_string(),
                            child,
                        ));
                    }
                    nodes[index].state = Some(self.parse_state(child)?);
                }
                "IdentityMapping" | "TranslationMapping" => {
                    if nodes[index].mapping.is_some() {
                        return Err(self.error_at(
                            SceneErrorCode::DuplicateComponent,
                            "a node holds at most one mapping".to_string(),
                            child,
                        ));
                    }
                    let mapping = if tag == "IdentityMapping" {
                        MappingDesc::Identity
                    } else {
                        let offset = match child.attribute("offset") {
                            Some(raw) => self.vec3(child, "offset", raw)?,
                            None => [0.0; 3],
                        };
                        MappingDesc::Translation { offset }
                    };
                    nodes[index].mapping = Some(mapping);
                    mapping_element = Some(child);
                }
                _ if tag.ends_with("Solver") => nodes[index].solver = true,
                // Visual models, loaders and the like have no effect on positions.
                _ => {}
            }
        }

        if let Some(element) = mapping_element {
            let has_input = ancestors(nodes, index).any(|ancestor| nodes[ancestor].state.is_some());
            if nodes[index].state.is_none() || !has_input {
                return Err(self.error_at(
                    SceneErrorCode::MappingWithoutInput,
                    "a mapping needs a <MechanicalObject> on its node and one on an ancestor"
                        .to_string(),
                    element,
                ));
            }
        }
        Ok(())
    }

    fn parse_state(&self, node: Node<'_, '_>) -> Result<StateDesc, SceneLoadError> {
        let name = node
            .attribute("name")
            .unwrap_or(DEFAULT_STATE_NAME)
            .to_string();
        let template = match node.attribute("template") {
            Some(raw) => Template::parse(raw).ok_or_else(|| {
                self.error_at(
                    SceneErrorCode::InvalidValue,
                    format!(
                        "invalid template '{raw}'; allowed values: Vec1d, Vec2d, Vec3d, Rigid3d"
                    ),
                    node,
                )
            })?,
            None => Template::Vec3d,
        };
        let dof = template.dof_per_point();

        let positions = self.numbers(node, "position", self.required_attribute(node, "position")?)?;
        if positions.len() % dof != 0 {
            return Err(self.error_at(
                SceneErrorCode::InvalidValue,
                format!(
                    "position holds {} values, not a multiple of {dof} for template {template:?}",
                    positions.len()
                ),
                node,
            ));
        }
        let velocities = match node.attribute("velocity") {
            Some(raw) => {
                let velocities = self.numbers(node, "velocity", raw)?;
                if velocities.len() != positions.len() {
                    return Err(self.error_at(
                        SceneErrorCode::InvalidValue,
                        format!(
                            "velocity holds {} values, position holds {}",
                            velocities.len(),
                            positions.len()
                        ),
                        node,
                    ));
                }
                velocities
            }
            None => vec![0.0; positions.len()],
        };

        Ok(StateDesc {
            name,
            template,
            positions,
            velocities,
        })
    }

    fn required_attribute<'n>(
        &self,
        node: Node<'n, '_>,
        attribute: &str,
    ) -> Result<&'n str, SceneLoadError> {
        node.attribute(attribute).ok_or_else(|| {
            self.error_at(
                SceneErrorCode::MissingAttribute,
                format!(
                    "missing required attribute '{attribute}' on <{}>",
                    node.tag_name().name()
                ),
                node,
            )
        })
    }

    fn numbers(
        &self,
        node: Node<'_, '_>,
        attribute: &str,
        raw: &str,
    ) -> Result<Vec<f64>, SceneLoadError> {
        raw.split_whitespace()
            .map(|token| self.number(node, attribute, token))
            .collect()
    }

    fn number(&self, node: Node<'_, '_>, attribute: &str, raw: &str) -> Result<f64, SceneLoadError> {
        raw.trim()
            .parse::<f64>()
            .ok()
            .filter(|value| value.is_finite())
            .ok_or_else(|| {
                self.error_at(
                    SceneErrorCode::InvalidValue,
                    format!("{attribute} value '{raw}' is not a finite number"),
                    node,
                )
            })
    }

    fn vec3(&self, node: Node<'_, '_>, attribute: &str, raw: &str) -> Result<[f64; 3], SceneLoadError> {
        let values = self.numbers(node, attribute, raw)?;
        <[f64; 3]>::try_from(values.as_slice()).map_err(|_| {
            self.error_at(
                SceneErrorCode::InvalidValue,
                format!("{attribute} needs 3 values, found {}", values.len()),
                node,
            )
        })
    }

    fn error_at(&self, code: SceneErrorCode, message: String, node: Node<'_, '_>) -> SceneLoadError {
        let pos = self.doc.text_pos_at(node.range().start);
        SceneLoadError {
            code,
            message,
            file_path: self.file_path.to_path_buf(),
            location: Some(SourceLocation {
                line: pos.row as usize,
                column: pos.col as usize,
            }),
        }
    }
}

fn ancestors(nodes: &[NodeDesc], index: usize) -> impl Iterator<Item = usize> + '_ {
    std::iter::successors(nodes[index].parent, move |current| nodes[*current].parent)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> Result<SceneDesc, SceneLoadError> {
        parse_scene(Path::new("scene.xml"), raw)
    }

    #[test]
    fn nodes_are_stored_in_document_pre_order() {
        let scene = parse(
            r#"<Node name="root" dt="0.02" gravity="0 0 -10">
                <Node name="body">
                    <EulerImplicitSolver/>
                    <MechanicalObject name="dofs" template="Vec2d" position="0 1 2 3"/>
                    <Node name="visual">
                        <MechanicalObject name="skin" position="0 0 0 1 1 1"/>
                        <TranslationMapping offset="0 0 1"/>
                        <OglModel/>
                    </Node>
                </Node>
                <Node name="floor"/>
            </Node>"#,
        )
        .expect("parse");

        assert_eq!(scene.dt, 0.02);
        assert_eq!(scene.gravity, [0.0, 0.0, -10.0]);
        let names = scene.nodes.iter().map(|node| node.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["root", "body", "visual", "floor"]);
        assert_eq!(scene.nodes[2].parent, Some(1));
        assert!(scene.nodes[1].solver);
        let body = scene.nodes[1].state.as_ref().expect("body state");
        assert_eq!(body.template, Template::Vec2d);
        assert_eq!(body.velocities, vec![0.0; 4]);
        assert_eq!(
            scene.nodes[2].mapping,
            Some(MappingDesc::Translation {
                offset: [0.0, 0.0, 1.0]
            })
        );
    }

    #[test]
    fn defaults_apply_without_attributes() {
        let scene = parse(r#"<Node name="root"/>"#).expect("parse");
        assert_eq!(scene.dt, DEFAULT_DT);
        assert_eq!(scene.gravity, DEFAULT_GRAVITY);
        assert_eq!(scene.nodes.len(), 1);
    }

    #[test]
    fn position_count_must_fit_the_template() {
        let error = parse(
            r#"<Node name="root">
    <MechanicalObject template="Rigid3d" position="0 0 0 0 0 0"/>
</Node>"#,
        )
        .expect_err("short rigid");
        assert_eq!(error.code, SceneErrorCode::InvalidValue);
        assert_eq!(error.location, Some(SourceLocation { line: 2, column: 5 }));
    }

    #[test]
    fn mapping_needs_an_ancestor_state() {
        let error = parse(
            r#"<Node name="root"><Node name="child">
                <MechanicalObject position="0 0 0"/><IdentityMapping/>
            </Node></Node>"#,
        )
        .expect_err("no input");
        assert_eq!(error.code, SceneErrorCode::MappingWithoutInput);
    }

    #[test]
    fn malformed_xml_and_wrong_root_are_located() {
        let malformed = parse("<Node name=\"root\">").expect_err("unclosed");
        assert_eq!(malformed.code, SceneErrorCode::XmlMalformed);
        assert!(malformed.location.is_some());

        let wrong_root = parse("<Scene/>").expect_err("root");
        assert_eq!(wrong_root.code, SceneErrorCode::InvalidRoot);
        assert!(wrong_root.to_string().contains("line=1, column=1"));
    }

    #[test]
    fn node_name_is_required_and_templates_are_checked() {
        let missing = parse(r#"<Node name="root"><Node/></Node>"#).expect_err("name");
        assert_eq!(missing.code, SceneErrorCode::MissingAttribute);

        let template = parse(
            r#"<Node name="root"><MechanicalObject template="Vec6d" position="0"/></Node>"#,
        )
        .expect_err("template");
        assert_eq!(template.code, SceneErrorCode::InvalidValue);
    }
}
