// Legacy garment JSON translation onto a decoded blob.

use std::collections::HashMap;

use serde::Deserialize;
use tracing::debug;

use super::blob::LegacyBlob;
use super::descriptor::{
    AvametricBaseMaterial, BodyAttachment, ClothAttachment, Constraint, ConstraintKind, Curve,
    CurveType, EdgeAttachment, EdgeTreatment, Fabric, GarmentDescriptor, Geometry, Piece,
    PieceMap, Seam,
};
use crate::error::{FacadeError, FacadeResult};

const DEFAULT_STIFFNESS: f32 = 1e3;
const DEFAULT_END_FRAME: i32 = 1_000_000;

#[derive(Debug, Deserialize)]
struct LegacyGarment {
    pieces: Vec<LegacyPiece>,
    #[serde(default)]
    sewing: Vec<LegacySeam>,
    #[serde(default)]
    handles: Vec<LegacyHandle>,
}

#[derive(Debug, Deserialize)]
struct LegacyPiece {
    name: String,
    #[serde(default)]
    extrusion: Option<LegacyExtrusion>,
    #[serde(default)]
    fabric: Option<LegacyFabric>,
    #[serde(default)]
    boundary: Vec<LegacyCurve>,
    #[serde(default)]
    internals: Vec<LegacyCurve>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum LegacyExtrusionType {
    Round,
    Block,
    Double,
}

#[derive(Debug, Deserialize)]
struct LegacyExtrusion {
    #[serde(rename = "type")]
    kind: LegacyExtrusionType,
    #[serde(default)]
    thickness: f32,
}

#[derive(Debug, Deserialize)]
struct LegacyMultipliers {
    density: f32,
    stretch: [f32; 4],
    bend: f32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GerberParameters {
    density: f32,
    stretch_x: f32,
    stretch_y: f32,
    stretch_bias: f32,
    bend_x: f32,
    bend_y: f32,
    bend_bias: f32,
}

#[derive(Debug, Deserialize)]
struct AnisotropicParameters {
    density: f32,
    #[serde(rename = "youngs_modulus_X")]
    youngs_modulus_x: f32,
    #[serde(rename = "youngs_modulus_Y")]
    youngs_modulus_y: f32,
    poissons_ratio: f32,
    shear_modulus: f32,
    #[serde(rename = "bendX")]
    bend_x: f32,
    #[serde(rename = "bendY")]
    bend_y: f32,
    #[serde(rename = "bendBias")]
    bend_bias: f32,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum LegacyFabric {
    AvametricV1 {
        name: AvametricBaseMaterial,
        multipliers: LegacyMultipliers,
    },
    Gerber {
        parameters: GerberParameters,
    },
    SimpleAnisotropic {
        parameters: AnisotropicParameters,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum LegacyCurveType {
    Bezier,
    Line,
    Polyline,
}

#[derive(Debug, Deserialize)]
struct LegacyPoint {
    loc: [f32; 2],
}

#[derive(Debug, Deserialize)]
struct LegacyCurve {
    name: String,
    #[serde(rename = "type")]
    kind: LegacyCurveType,
    #[serde(default)]
    points: Vec<LegacyPoint>,
}

#[derive(Debug, Deserialize)]
struct LegacyCurveRef {
    piece: String,
    curve: String,
}

#[derive(Debug, Deserialize)]
struct LegacyFold {
    angle: f32,
}

#[derive(Debug, Deserialize)]
struct LegacySeam {
    first: LegacyCurveRef,
    second: LegacyCurveRef,
    #[serde(default)]
    reverse: bool,
    #[serde(default)]
    sewn_fold: Option<LegacyFold>,
}

#[derive(Debug, Deserialize)]
struct LegacyEdgeRef {
    panel: String,
    edge: String,
}

fn default_true() -> bool {
    true
}

fn default_stiffness() -> f32 {
    DEFAULT_STIFFNESS
}

fn default_end_frame() -> i32 {
    DEFAULT_END_FRAME
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum LegacyHandleKind {
    Node {
        vertices: Vec<u32>,
    },
    Force {
        direction: [f32; 3],
        edges: Option<Vec<LegacyEdgeRef>>,
        cloth_ms: Option<[f32; 2]>,
    },
    Pin {
        slack: f32,
        cloth_ms: [f32; 2],
        obs_uv: Option<[f32; 2]>,
        obs_bary: Option<[f32; 3]>,
        obs_face: Option<u32>,
    },
    #[serde(alias = "collar")]
    Centering {
        edges: Vec<LegacyEdgeRef>,
    },
    Barrier {
        normal: [f32; 3],
        #[serde(default = "default_true")]
        animate_normal: bool,
        edges: Vec<LegacyEdgeRef>,
        obs_uv: Option<[f32; 2]>,
        obs_bary: Option<[f32; 3]>,
        obs_face: Option<u32>,
    },
    Elastic {
        target_length: f32,
        edges: Vec<LegacyEdgeRef>,
    },
    Belt {
        slack: f32,
        normal: [f32; 3],
        #[serde(default = "default_true")]
        animate_normal: bool,
        edges: Vec<LegacyEdgeRef>,
        obs_uv: Option<[f32; 2]>,
        obs_bary: Option<[f32; 3]>,
        obs_face: Option<u32>,
    },
    RegularButton {
        first: [f32; 2],
        second: [f32; 2],
    },
    OrientedButton {
        first: [f32; 2],
        second: [f32; 2],
    },
}

#[derive(Debug, Deserialize)]
struct LegacyHandle {
    #[serde(default)]
    name: String,
    #[serde(default = "default_stiffness")]
    stiffness: f32,
    #[serde(default)]
    start_frame: i32,
    #[serde(default = "default_end_frame")]
    end_frame: i32,
    #[serde(flatten)]
    kind: LegacyHandleKind,
}

/// Name lookups over blob pieces and their curves.
struct NameIndex<'a> {
    pieces: HashMap<&'a str, u32>,
    curves: Vec<HashMap<&'a str, u32>>,
}

impl<'a> NameIndex<'a> {
    fn new(blob: &'a LegacyBlob) -> Self {
        Self {
            pieces: blob.piece_index(),
            curves: blob.curve_index(),
        }
    }

    fn resolve(&self, piece: &str, curve: &str) -> FacadeResult<EdgeAttachment> {
        let piece_id = *self
            .pieces
            .get(piece)
            .ok_or_else(|| FacadeError::format(format!("unknown piece '{}'", piece)))?;
        let curve_id = self
            .curves
            .get(piece_id as usize)
            .and_then(|curves| curves.get(curve))
            .ok_or_else(|| {
                FacadeError::format(format!("piece '{}' has no curve '{}'", piece, curve))
            })?;
        Ok(EdgeAttachment {
            piece: piece_id,
            curve: *curve_id,
        })
    }

    fn resolve_edges(&self, edges: &[LegacyEdgeRef]) -> FacadeResult<Vec<EdgeAttachment>> {
        edges
            .iter()
            .map(|e| self.resolve(&e.panel, &e.edge))
            .collect()
    }
}

impl LegacyFabric {
    fn into_fabric(self) -> Fabric {
        match self {
            LegacyFabric::AvametricV1 { name, multipliers } => Fabric::AvametricV1 {
                basetype: name,
                density: multipliers.density,
                stretch: multipliers.stretch,
                bending: multipliers.bend,
            },
            LegacyFabric::Gerber { parameters: p } => Fabric::Gerber {
                density: p.density,
                stretch_x: p.stretch_x,
                stretch_y: p.stretch_y,
                stretch_bias: p.stretch_bias,
                bending_x: p.bend_x,
                bending_y: p.bend_y,
                bending_bias: p.bend_bias,
            },
            LegacyFabric::SimpleAnisotropic { parameters: p } => Fabric::SimpleAnisotropic {
                density: p.density,
                youngs_modulus_x: p.youngs_modulus_x,
                youngs_modulus_y: p.youngs_modulus_y,
                poissons_ratio: p.poissons_ratio,
                shear_modulus: p.shear_modulus,
                bending_x: p.bend_x,
                bending_y: p.bend_y,
                bending_bias: p.bend_bias,
            },
        }
    }
}

fn body_attachment(
    handle: &str,
    obs_uv: Option<[f32; 2]>,
    obs_bary: Option<[f32; 3]>,
    obs_face: Option<u32>,
) -> FacadeResult<BodyAttachment> {
    match (obs_uv, obs_bary, obs_face) {
        (Some(uv), _, _) => Ok(BodyAttachment::Uv { uv, channel: 0 }),
        (None, Some(coords), Some(face)) => Ok(BodyAttachment::Bary { coords, face }),
        _ => Err(FacadeError::format(format!(
            "handle '{}' needs obs_uv or obs_bary with obs_face",
            handle
        ))),
    }
}

fn convert_handle(handle: LegacyHandle, names: &NameIndex<'_>) -> FacadeResult<Constraint> {
    let name = handle.name;
    let kind = match handle.kind {
        LegacyHandleKind::Node { vertices } => ConstraintKind::Node { vertices },
        LegacyHandleKind::Force {
            direction,
            edges,
            cloth_ms,
        } => {
            let cloth = match (edges, cloth_ms) {
                (Some(edges), _) => ClothAttachment::Edges(names.resolve_edges(&edges)?),
                (None, Some(ms)) => ClothAttachment::Ms(ms),
                (None, None) => {
                    return Err(FacadeError::format(format!(
                        "force handle '{}' needs edges or cloth_ms",
                        name
                    )))
                }
            };
            ConstraintKind::Force { direction, cloth }
        }
        LegacyHandleKind::Pin {
            slack,
            cloth_ms,
            obs_uv,
            obs_bary,
            obs_face,
        } => ConstraintKind::Pin {
            slack,
            cloth_ms,
            body: body_attachment(&name, obs_uv, obs_bary, obs_face)?,
        },
        LegacyHandleKind::Centering { edges } => ConstraintKind::Centering {
            edges: names.resolve_edges(&edges)?,
        },
        LegacyHandleKind::Barrier {
            normal,
            animate_normal,
            edges,
            obs_uv,
            obs_bary,
            obs_face,
        } => ConstraintKind::Barrier {
            normal,
            animate_normal,
            edges: names.resolve_edges(&edges)?,
            body: body_attachment(&name, obs_uv, obs_bary, obs_face)?,
        },
        LegacyHandleKind::Elastic {
            target_length,
            edges,
        } => ConstraintKind::Elastic {
            target_length,
            edges: names.resolve_edges(&edges)?,
        },
        LegacyHandleKind::Belt {
            slack,
            normal,
            animate_normal,
            edges,
            obs_uv,
            obs_bary,
            obs_face,
        } => ConstraintKind::Belt {
            slack,
            normal,
            animate_normal,
            edges: names.resolve_edges(&edges)?,
            body: body_attachment(&name, obs_uv, obs_bary, obs_face)?,
        },
        LegacyHandleKind::RegularButton { first, second } => {
            ConstraintKind::Button { first, second }
        }
        LegacyHandleKind::OrientedButton { first, second } => {
            ConstraintKind::OrientedButton { first, second }
        }
    };

    Ok(Constraint {
        name,
        stiffness: handle.stiffness,
        start_frame: handle.start_frame,
        end_frame: handle.end_frame,
        kind,
    })
}

/// Translate a legacy garment JSON document against its decoded blob.
pub fn convert_garment(blob: &LegacyBlob, json: &str) -> FacadeResult<GarmentDescriptor> {
    let doc: LegacyGarment = serde_json::from_str(json)?;

    if doc.pieces.len() != blob.pieces.len() {
        return Err(FacadeError::format(format!(
            "json describes {} pieces, blob '{}' has {}",
            doc.pieces.len(),
            blob.name,
            blob.pieces.len()
        )));
    }

    let names = NameIndex::new(blob);
    let mut fabrics = vec![Fabric::default()];
    let mut pieces = Vec::with_capacity(blob.pieces.len());
    let mut piece_maps = Vec::with_capacity(blob.pieces.len());

    let mut json_pieces: HashMap<String, LegacyPiece> = doc
        .pieces
        .into_iter()
        .map(|p| (p.name.clone(), p))
        .collect();

    for (piece_id, blob_piece) in blob.pieces.iter().enumerate() {
        let json_piece = json_pieces.remove(&blob_piece.name).ok_or_else(|| {
            FacadeError::format(format!("piece '{}' missing from json", blob_piece.name))
        })?;

        let (edge_treatment, extrusion_thickness) = match &json_piece.extrusion {
            Some(e) => {
                let treatment = match e.kind {
                    LegacyExtrusionType::Round => EdgeTreatment::Round,
                    LegacyExtrusionType::Block => EdgeTreatment::Block,
                    LegacyExtrusionType::Double => EdgeTreatment::DoubleRound,
                };
                (treatment, e.thickness)
            }
            None => (EdgeTreatment::Block, 0.0),
        };

        let fabric = match json_piece.fabric {
            Some(legacy) => {
                fabrics.push(legacy.into_fabric());
                (fabrics.len() - 1) as u32
            }
            None => 0,
        };

        let mut curves = Vec::new();
        let mut curve_maps = Vec::new();
        let mut boundary = Vec::new();
        for blob_curve in blob
            .curves
            .iter()
            .filter(|c| c.piece_id as usize == piece_id)
        {
            let (json_curve, is_boundary) = match json_piece
                .boundary
                .iter()
                .find(|c| c.name == blob_curve.name)
            {
                Some(c) => (c, true),
                None => json_piece
                    .internals
                    .iter()
                    .find(|c| c.name == blob_curve.name)
                    .map(|c| (c, false))
                    .ok_or_else(|| {
                        FacadeError::format(format!(
                            "curve '{}' of piece '{}' missing from json",
                            blob_curve.name, blob_piece.name
                        ))
                    })?,
            };

            let kind = match json_curve.kind {
                LegacyCurveType::Bezier => CurveType::Bezier,
                LegacyCurveType::Line | LegacyCurveType::Polyline => CurveType::Polyline,
            };
            curves.push(Curve {
                name: blob_curve.name.clone(),
                kind,
                control_points: json_curve.points.iter().map(|p| p.loc).collect(),
            });
            curve_maps.push(blob_curve.vertices.clone());
            if is_boundary {
                boundary.push((curves.len() - 1) as u32);
            }
        }

        debug!(
            "piece '{}': {} curves, fabric {}",
            blob_piece.name,
            curves.len(),
            fabric
        );
        pieces.push(Piece {
            name: blob_piece.name.clone(),
            fabric,
            edge_treatment,
            extrusion_thickness,
            curves,
            boundary,
        });
        piece_maps.push(PieceMap {
            vertices_ms: blob_piece.vertices.clone(),
            curve_maps,
        });
    }

    let seams = doc
        .sewing
        .iter()
        .map(|s| {
            let a = names.resolve(&s.first.piece, &s.first.curve)?;
            let b = names.resolve(&s.second.piece, &s.second.curve)?;
            Ok(Seam {
                piece_a: a.piece,
                curve_a: a.curve,
                piece_b: b.piece,
                curve_b: b.curve,
                reversed: s.reverse,
                seam_angle: s.sewn_fold.as_ref().map(|f| f.angle),
            })
        })
        .collect::<FacadeResult<Vec<_>>>()?;

    let constraints = doc
        .handles
        .into_iter()
        .map(|h| convert_handle(h, &names))
        .collect::<FacadeResult<Vec<_>>>()?;

    let garment = GarmentDescriptor {
        name: blob.name.clone(),
        initial_geometry: Geometry::from_blob(blob),
        piece_maps,
        fabrics,
        pieces,
        seams,
        constraints,
    };
    garment.validate()?;
    Ok(garment)
}
