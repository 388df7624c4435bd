// Scene conversion - legacy binary+JSON bundles into engine descriptors.

pub mod blob;
pub mod descriptor;
pub mod garment;

use std::fs::File;
use std::path::Path;

use memmap2::Mmap;
use tracing::{debug, info};

use self::blob::LegacyBlob;
use self::descriptor::{Geometry, GarmentDescriptor, ObstacleDescriptor, SceneDescriptor};
use crate::error::{FacadeError, FacadeResult, SceneSide};

/// Map a legacy blob file and decode it.
pub fn load_blob(path: &Path) -> FacadeResult<LegacyBlob> {
    let file = File::open(path).map_err(|e| FacadeError::io(path, e))?;
    let len = file.metadata().map_err(|e| FacadeError::io(path, e))?.len();
    if len == 0 {
        return LegacyBlob::decode(&[]);
    }

    // SAFETY: the mapping is read-only and dropped before this function returns.
    let mmap = unsafe { Mmap::map(&file) }.map_err(|e| FacadeError::io(path, e))?;
    let blob = LegacyBlob::decode(&mmap)?;
    debug!(
        "loaded blob '{}' v{} from {}: {} vertices, {} faces",
        blob.name,
        blob.version,
        path.display(),
        blob.num_vertices(),
        blob.faces.len()
    );
    Ok(blob)
}

fn load_bundle(binary_path: &Path, json_path: &Path) -> FacadeResult<(LegacyBlob, String)> {
    let blob = load_blob(binary_path)?;
    let json = std::fs::read_to_string(json_path).map_err(|e| FacadeError::io(json_path, e))?;
    Ok((blob, json))
}

pub fn convert_legacy_garment(
    binary_path: &Path,
    json_path: &Path,
) -> FacadeResult<GarmentDescriptor> {
    let (blob, json) = load_bundle(binary_path, json_path)?;
    let garment = garment::convert_garment(&blob, &json)?;
    info!(
        "converted garment '{}': {} pieces, {} seams, {} constraints",
        garment.name,
        garment.pieces.len(),
        garment.seams.len(),
        garment.constraints.len()
    );
    Ok(garment)
}

/// Obstacles take their geometry from the blob; the JSON side only has to parse.
pub fn convert_obstacle(blob: &LegacyBlob, json: &str) -> FacadeResult<ObstacleDescriptor> {
    let _: serde_json::Value = serde_json::from_str(json)?;
    let obstacle = ObstacleDescriptor {
        name: blob.name.clone(),
        initial_geometry: Geometry::from_blob(blob),
    };
    obstacle.validate()?;
    Ok(obstacle)
}

pub fn convert_legacy_obstacle(
    binary_path: &Path,
    json_path: &Path,
) -> FacadeResult<ObstacleDescriptor> {
    let (blob, json) = load_bundle(binary_path, json_path)?;
    let obstacle = convert_obstacle(&blob, &json)?;
    info!(
        "converted obstacle '{}': {} vertices",
        obstacle.name,
        obstacle.initial_geometry.vertices_ws.len()
    );
    Ok(obstacle)
}

/// One garment and one obstacle. A failure names the side it came from.
pub fn convert_legacy_arcsim_scene(
    garment_bin: &Path,
    garment_json: &Path,
    obstacle_bin: &Path,
    obstacle_json: &Path,
) -> FacadeResult<SceneDescriptor> {
    let garment = convert_legacy_garment(garment_bin, garment_json)
        .map_err(|e| FacadeError::scene(SceneSide::Garment, e))?;
    let obstacle = convert_legacy_obstacle(obstacle_bin, obstacle_json)
        .map_err(|e| FacadeError::scene(SceneSide::Obstacle, e))?;
    Ok(SceneDescriptor {
        garments: vec![garment],
        obstacles: vec![obstacle],
    })
}
