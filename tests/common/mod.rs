// Shared fixtures: legacy blob writers and small descriptors.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use arcsim_facade::convert::descriptor::{
    EdgeTreatment, Face, Fabric, GarmentDescriptor, Geometry, ObstacleDescriptor, Piece, PieceMap,
};

fn put_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put_f32(out: &mut Vec<u8>, v: f32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put_str(out: &mut Vec<u8>, s: &str) {
    put_u32(out, s.len() as u32);
    out.extend_from_slice(s.as_bytes());
}

/// Two disjoint quads in the 0.1 layout: piece "left" owns vertices 0..4,
/// piece "right" owns 4..8. Each piece has one curve on its first edge.
pub fn two_quads_v0_1() -> Vec<u8> {
    let mut out = Vec::new();
    put_u16(&mut out, 0);
    put_u16(&mut out, 1);
    put_str(&mut out, "pants");
    put_u32(&mut out, 0); // texture channels
    put_u32(&mut out, 1); // has 2D
    put_u32(&mut out, 0);
    put_u32(&mut out, 0);
    put_u32(&mut out, 8); // vertices
    put_u32(&mut out, 4); // faces
    put_u32(&mut out, 2); // pieces
    put_u32(&mut out, 2); // curves
    put_u32(&mut out, 0);
    put_u32(&mut out, 0);

    for i in 0..8 {
        let x = (i % 4) as f32;
        put_f32(&mut out, x);
        put_f32(&mut out, (i / 4) as f32);
        put_f32(&mut out, 0.0);
    }
    for i in 0..8 {
        put_f32(&mut out, (i % 4) as f32);
        put_f32(&mut out, (i / 4) as f32);
    }
    for face in [[0, 1, 2], [0, 2, 3], [4, 5, 6], [4, 6, 7]] {
        for v in face {
            put_u32(&mut out, v);
        }
    }
    put_str(&mut out, "left");
    put_str(&mut out, "right");

    put_str(&mut out, "waist");
    put_u32(&mut out, 0);
    put_u32(&mut out, 2);
    put_u32(&mut out, 0);
    put_u32(&mut out, 1);

    put_str(&mut out, "waist");
    put_u32(&mut out, 1);
    put_u32(&mut out, 2);
    put_u32(&mut out, 5);
    put_u32(&mut out, 4);
    out
}

pub const TWO_QUADS_JSON: &str = r#"{
    "pieces": [
        {"name": "left", "boundary": [{"name": "waist", "type": "line", "points": [{"loc": [0, 0]}, {"loc": [1, 0]}]}]},
        {"name": "right", "boundary": [{"name": "waist", "type": "line", "points": [{"loc": [0, 0]}, {"loc": [1, 0]}]}]}
    ],
    "sewing": [
        {"first": {"piece": "left", "curve": "waist"}, "second": {"piece": "right", "curve": "waist"}, "reverse": false}
    ],
    "handles": [
        {"type": "elastic", "target_length": 0.8, "edges": [{"panel": "left", "edge": "waist"}]}
    ]
}"#;

pub fn write_file(dir: &Path, name: &str, contents: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

fn triangle_geometry() -> Geometry {
    Geometry {
        vertices_ws: vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
        vertices_ms: Some(vec![[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]]),
        texture_channels: vec![],
        faces: vec![Face {
            tri_ws: [0, 1, 2],
            tri_ms: [0, 1, 2],
            tri_tx_chns: vec![],
        }],
    }
}

pub fn garment(name: &str) -> GarmentDescriptor {
    GarmentDescriptor {
        name: name.to_string(),
        initial_geometry: triangle_geometry(),
        piece_maps: vec![PieceMap {
            vertices_ms: vec![0, 1, 2],
            curve_maps: vec![],
        }],
        fabrics: vec![Fabric::default()],
        pieces: vec![Piece {
            name: "panel".to_string(),
            fabric: 0,
            edge_treatment: EdgeTreatment::Block,
            extrusion_thickness: 0.0,
            curves: vec![],
            boundary: vec![],
        }],
        seams: vec![],
        constraints: vec![],
    }
}

pub fn obstacle(name: &str) -> ObstacleDescriptor {
    ObstacleDescriptor {
        name: name.to_string(),
        initial_geometry: triangle_geometry(),
    }
}
