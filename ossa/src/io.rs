use ossa_bone::{BoneKey, BoneKeyError};
use ossa_scene::serialize::{Deserializer, IdTable, Serializer};
use ossa_scene::{Frame, Project};

/// Encodes `key` and its frame with node ids taken from the project's current tree.
pub fn write_bone_key(key: &BoneKey, project: &Project) -> Result<Vec<u8>, BoneKeyError> {
    let ids = IdTable::from_tree(&*project.read_tree()?);
    let mut out = Serializer::new(Vec::new(), &ids);
    out.write(&key.frame());
    key.serialize(&mut out)?;
    Ok(out.into_inner())
}

/// Decodes a key written by [`write_bone_key`] against the project's tree,
/// running both reference phases.
pub fn read_bone_key(bytes: &[u8], project: &Project) -> Result<BoneKey, BoneKeyError> {
    let ids = IdTable::from_tree(&*project.read_tree()?);
    let mut input = Deserializer::new(bytes);

    let frame: Frame = input.read();
    input.check_stream()?;

    let mut key = BoneKey::new(frame);
    key.deserialize(&mut input)?;
    let resolver = input.finish(&ids)?;
    key.resolve_references(&resolver)?;
    Ok(key)
}
