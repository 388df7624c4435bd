// Engine-side scene descriptors produced by legacy conversion and accepted by sessions.

use serde::{Deserialize, Serialize};

use super::blob::LegacyBlob;
use crate::error::{FacadeError, FacadeResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Face {
    pub tri_ws: [u32; 3],
    pub tri_ms: [u32; 3],
    /// One triangle per texture channel.
    #[serde(default)]
    pub tri_tx_chns: Vec<[u32; 3]>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    pub vertices_ws: Vec<[f32; 3]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vertices_ms: Option<Vec<[f32; 2]>>,
    #[serde(default)]
    pub texture_channels: Vec<Vec<[f32; 2]>>,
    pub faces: Vec<Face>,
}

impl Geometry {
    /// Legacy blobs share one index triple across world, material and texture space.
    pub fn from_blob(blob: &LegacyBlob) -> Self {
        let n_channels = blob.texture_channels.len();
        let faces = blob
            .faces
            .iter()
            .map(|tri| Face {
                tri_ws: *tri,
                tri_ms: *tri,
                tri_tx_chns: vec![*tri; n_channels],
            })
            .collect();

        Self {
            vertices_ws: blob.vertices_3d.clone(),
            vertices_ms: blob.vertices_2d.clone(),
            texture_channels: blob.texture_channels.clone(),
            faces,
        }
    }

    /// Vertex count addressed by material-space indices.
    pub fn num_vertices_ms(&self) -> usize {
        self.vertices_ms
            .as_ref()
            .map_or(self.vertices_ws.len(), |ms| ms.len())
    }

    pub fn validate(&self) -> FacadeResult<()> {
        let n_ws = self.vertices_ws.len();
        let n_ms = self.num_vertices_ms();

        for (f, face) in self.faces.iter().enumerate() {
            if face.tri_ws.iter().any(|i| *i as usize >= n_ws) {
                return Err(FacadeError::format(format!(
                    "face {} world-space triangle {:?} exceeds {} vertices",
                    f, face.tri_ws, n_ws
                )));
            }
            if face.tri_ms.iter().any(|i| *i as usize >= n_ms) {
                return Err(FacadeError::format(format!(
                    "face {} material-space triangle {:?} exceeds {} vertices",
                    f, face.tri_ms, n_ms
                )));
            }
            if face.tri_tx_chns.len() > self.texture_channels.len() {
                return Err(FacadeError::format(format!(
                    "face {} lists {} texture triangles for {} channels",
                    f,
                    face.tri_tx_chns.len(),
                    self.texture_channels.len()
                )));
            }
            for (tri, channel) in face.tri_tx_chns.iter().zip(&self.texture_channels) {
                if tri.iter().any(|i| *i as usize >= channel.len()) {
                    return Err(FacadeError::format(format!(
                        "face {} texture triangle {:?} exceeds its channel",
                        f, tri
                    )));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PieceMap {
    pub vertices_ms: Vec<u32>,
    /// Vertex ids per curve, in the piece's curve order.
    pub curve_maps: Vec<Vec<u32>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeTreatment {
    Round,
    Block,
    DoubleRound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CurveType {
    Bezier,
    Polyline,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Curve {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: CurveType,
    pub control_points: Vec<[f32; 2]>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Piece {
    pub name: String,
    /// Index into the garment's fabric table.
    pub fabric: u32,
    pub edge_treatment: EdgeTreatment,
    pub extrusion_thickness: f32,
    pub curves: Vec<Curve>,
    /// Indices of boundary curves within `curves`.
    pub boundary: Vec<u32>,
}

/// Base materials known to the avametric fabric model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AvametricBaseMaterial {
    #[serde(rename = "gray-interlock")]
    GrayInterlock,
    #[serde(rename = "11oz-black-denim")]
    BlackDenim11oz,
    #[serde(rename = "ivory-rib-knit")]
    IvoryRibKnit,
    #[serde(rename = "pink-ribbon-brown")]
    PinkRibbonBrown,
    #[serde(rename = "aluminium")]
    Aluminium,
    #[serde(rename = "royal-target")]
    RoyalTarget,
    #[serde(rename = "camel-ponte-roma")]
    CamelPonteRoma,
    #[serde(rename = "tango-red-jet-set")]
    TangoRedJetSet,
    #[serde(rename = "white-dots-on-blk")]
    WhiteDotsOnBlk,
    #[serde(rename = "white-swim-solid")]
    WhiteSwimSolid,
    #[serde(rename = "isotropic")]
    Isotropic,
    #[serde(rename = "navy-sparkle-sweat")]
    NavySparkleSweat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Fabric {
    AvametricV1 {
        basetype: AvametricBaseMaterial,
        density: f32,
        /// c11, c12, c22, c33 multipliers.
        stretch: [f32; 4],
        bending: f32,
    },
    Gerber {
        density: f32,
        stretch_x: f32,
        stretch_y: f32,
        stretch_bias: f32,
        bending_x: f32,
        bending_y: f32,
        bending_bias: f32,
    },
    SimpleAnisotropic {
        density: f32,
        youngs_modulus_x: f32,
        youngs_modulus_y: f32,
        poissons_ratio: f32,
        shear_modulus: f32,
        bending_x: f32,
        bending_y: f32,
        bending_bias: f32,
    },
}

impl Default for Fabric {
    /// Gray interlock with unit multipliers, used by pieces that name no fabric.
    fn default() -> Self {
        Fabric::AvametricV1 {
            basetype: AvametricBaseMaterial::GrayInterlock,
            density: 1.0,
            stretch: [1.0; 4],
            bending: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Seam {
    pub piece_a: u32,
    pub curve_a: u32,
    pub piece_b: u32,
    pub curve_b: u32,
    pub reversed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seam_angle: Option<f32>,
}

/// A piece curve addressed by index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeAttachment {
    pub piece: u32,
    pub curve: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClothAttachment {
    Edges(Vec<EdgeAttachment>),
    /// Material-space location on the cloth.
    Ms([f32; 2]),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BodyAttachment {
    Uv { uv: [f32; 2], channel: u32 },
    Bary { coords: [f32; 3], face: u32 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConstraintKind {
    Node {
        vertices: Vec<u32>,
    },
    Force {
        direction: [f32; 3],
        cloth: ClothAttachment,
    },
    Pin {
        slack: f32,
        cloth_ms: [f32; 2],
        body: BodyAttachment,
    },
    Centering {
        edges: Vec<EdgeAttachment>,
    },
    Barrier {
        normal: [f32; 3],
        animate_normal: bool,
        edges: Vec<EdgeAttachment>,
        body: BodyAttachment,
    },
    Elastic {
        target_length: f32,
        edges: Vec<EdgeAttachment>,
    },
    Belt {
        slack: f32,
        normal: [f32; 3],
        animate_normal: bool,
        edges: Vec<EdgeAttachment>,
        body: BodyAttachment,
    },
    Button {
        first: [f32; 2],
        second: [f32; 2],
    },
    OrientedButton {
        first: [f32; 2],
        second: [f32; 2],
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    pub name: String,
    pub stiffness: f32,
    pub start_frame: i32,
    pub end_frame: i32,
    pub kind: ConstraintKind,
}

impl ConstraintKind {
    fn edges(&self) -> &[EdgeAttachment] {
        match self {
            ConstraintKind::Force {
                cloth: ClothAttachment::Edges(edges),
                ..
            }
            | ConstraintKind::Centering { edges }
            | ConstraintKind::Barrier { edges, .. }
            | ConstraintKind::Elastic { edges, .. }
            | ConstraintKind::Belt { edges, .. } => edges.as_slice(),
            _ => &[],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GarmentDescriptor {
    pub name: String,
    pub initial_geometry: Geometry,
    pub piece_maps: Vec<PieceMap>,
    /// Index 0 always holds the default fabric.
    pub fabrics: Vec<Fabric>,
    pub pieces: Vec<Piece>,
    #[serde(default)]
    pub seams: Vec<Seam>,
    #[serde(default)]
    pub constraints: Vec<Constraint>,
}

impl GarmentDescriptor {
    /// Structural check run before a garment reaches the kernel.
    pub fn validate(&self) -> FacadeResult<()> {
        self.initial_geometry.validate()?;
        let n_ms = self.initial_geometry.num_vertices_ms();

        if self.piece_maps.len() != self.pieces.len() {
            return Err(FacadeError::format(format!(
                "garment '{}' has {} piece maps for {} pieces",
                self.name,
                self.piece_maps.len(),
                self.pieces.len()
            )));
        }

        for (piece, map) in self.pieces.iter().zip(&self.piece_maps) {
            if piece.fabric as usize >= self.fabrics.len() {
                return Err(FacadeError::format(format!(
                    "piece '{}' uses fabric {} of {}",
                    piece.name,
                    piece.fabric,
                    self.fabrics.len()
                )));
            }
            if map.curve_maps.len() != piece.curves.len() {
                return Err(FacadeError::format(format!(
                    "piece '{}' has {} curve maps for {} curves",
                    piece.name,
                    map.curve_maps.len(),
                    piece.curves.len()
                )));
            }
            let out_of_range = map
                .vertices_ms
                .iter()
                .chain(map.curve_maps.iter().flatten())
                .any(|v| *v as usize >= n_ms);
            if out_of_range {
                return Err(FacadeError::format(format!(
                    "piece '{}' maps a vertex beyond the {} material-space vertices",
                    piece.name, n_ms
                )));
            }
            if piece
                .boundary
                .iter()
                .any(|c| *c as usize >= piece.curves.len())
            {
                return Err(FacadeError::format(format!(
                    "piece '{}' boundary references a missing curve",
                    piece.name
                )));
            }
        }

        for seam in &self.seams {
            self.check_edge(seam.piece_a, seam.curve_a)?;
            self.check_edge(seam.piece_b, seam.curve_b)?;
        }

        for constraint in &self.constraints {
            for edge in constraint.kind.edges() {
                self.check_edge(edge.piece, edge.curve)?;
            }
            if let ConstraintKind::Node { vertices } = &constraint.kind {
                if vertices
                    .iter()
                    .any(|v| *v as usize >= self.initial_geometry.vertices_ws.len())
                {
                    return Err(FacadeError::format(format!(
                        "node constraint '{}' references a missing vertex",
                        constraint.name
                    )));
                }
            }
        }
        Ok(())
    }

    fn check_edge(&self, piece: u32, curve: u32) -> FacadeResult<()> {
        let found = self
            .pieces
            .get(piece as usize)
            .is_some_and(|p| (curve as usize) < p.curves.len());
        if !found {
            return Err(FacadeError::format(format!(
                "garment '{}' references missing curve {} of piece {}",
                self.name, curve, piece
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObstacleDescriptor {
    pub name: String,
    pub initial_geometry: Geometry,
}

impl ObstacleDescriptor {
    pub fn validate(&self) -> FacadeResult<()> {
        self.initial_geometry.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneDescriptor {
    pub garments: Vec<GarmentDescriptor>,
    pub obstacles: Vec<ObstacleDescriptor>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle() -> Geometry {
        Geometry {
            vertices_ws: vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
            vertices_ms: None,
            texture_channels: vec![],
            faces: vec![Face {
                tri_ws: [0, 1, 2],
                tri_ms: [0, 1, 2],
                tri_tx_chns: vec![],
            }],
        }
    }

    #[test]
    fn test_geometry_rejects_out_of_range_face() {
        let mut geometry = triangle();
        assert!(geometry.validate().is_ok());
        geometry.faces[0].tri_ws = [0, 1, 3];
        assert!(geometry.validate().is_err());
    }

    #[test]
    fn test_fabric_json_shape() {
        let json = serde_json::to_value(Fabric::default()).unwrap();
        assert_eq!(json["type"], "avametric_v1");
        assert_eq!(json["basetype"], "gray-interlock");
    }

    #[test]
    fn test_obstacle_parses_from_json() {
        let text = r#"{
            "name": "body",
            "initial_geometry": {
                "vertices_ws": [[0,0,0],[1,0,0],[0,1,0]],
                "faces": [{"tri_ws": [0,1,2], "tri_ms": [0,1,2]}]
            }
        }"#;
        let obstacle: ObstacleDescriptor = serde_json::from_str(text).unwrap();
        assert_eq!(obstacle.initial_geometry, triangle());
        assert!(obstacle.validate().is_ok());
    }
}
