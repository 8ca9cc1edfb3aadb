use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use glam::Mat4;
use log::{debug, warn};

use crate::{
    ancestor::AncestorCache,
    bind_pose::InverseBindPose,
    bone_map::BoneMap,
    buffer::GpuSyncBuffer,
    config::SkinConfig,
    error::Result,
    gpu::{Renderer, Shader, UniformBlock},
    matrix::compute_skinning_matrices,
    scene::{HierarchyListener, Node},
    skeleton::Skeleton,
};

/// Hash of a component type name, stable across runs.
pub const fn component_type(name: &str) -> i64 {
    let bytes = name.as_bytes();
    let mut hash: i64 = 98764321261;
    let mut index = 0;
    while index < bytes.len() {
        hash = hash.wrapping_mul(31).wrapping_add(bytes[index] as i64);
        index += 1;
    }
    hash
}

struct SkinState<B: UniformBlock> {
    config: SkinConfig,
    enabled: bool,
    owner: Option<Weak<Node>>,
    skeleton: Weak<dyn Skeleton>,
    bone_map: BoneMap,
    inverse_bind_pose: InverseBindPose,
    ancestor: Option<AncestorCache>,
    skinning: Vec<Mat4>,
    buffer: GpuSyncBuffer<B>,
}

impl<B: UniformBlock> SkinState<B> {
    fn normalization(&mut self, skeleton: &dyn Skeleton) -> Mat4 {
        let Some(owner) = self.owner.as_ref().and_then(Weak::upgrade) else {
            self.ancestor = None;
            return Mat4::IDENTITY;
        };
        let root = skeleton.root_node();
        if Arc::ptr_eq(&owner, &root) {
            self.ancestor = None;
            return Mat4::IDENTITY;
        }
        if let Some(normalization) = self
            .ancestor
            .as_mut()
            .and_then(|cache| cache.refresh(&owner, &root))
        {
            return normalization;
        }

        let cache = AncestorCache::resolve(&owner, &root);
        if let Some(ancestor) = cache.ancestor() {
            debug!(
                "Skin on node #{} resolved node #{} as common parent with skeleton root #{}",
                owner.id(),
                ancestor.id(),
                root.id()
            );
        }
        let normalization = cache.normalization();
        self.ancestor = Some(cache);
        normalization
    }

    fn invalidate_ancestor(&mut self) {
        self.ancestor = None;
    }

    // Only the owner and the skeleton root affect the normalization.
    fn is_tracked(&self, node: &Node) -> bool {
        let is_owner = self
            .owner
            .as_ref()
            .and_then(Weak::upgrade)
            .is_some_and(|owner| owner.id() == node.id());
        let is_root = self
            .skeleton
            .upgrade()
            .is_some_and(|skeleton| skeleton.root_node().id() == node.id());
        is_owner || is_root
    }

    // Drop the subscription on `node` unless it is still tracked.
    fn unsubscribe_stale(
        &self,
        node: Option<Arc<Node>>,
        listener: &Weak<dyn HierarchyListener>,
    ) {
        if let Some(node) = node {
            if !self.is_tracked(&node) {
                node.unsubscribe(listener);
            }
        }
    }
}

/// Skinning data of one mesh bound to a shared skeleton.
///
/// Every method takes the same lock for its whole duration, so an update
/// pass may change the bone map or bind pose while a render pass calls
/// [`Skin::update_gpu`] from another thread.
pub struct Skin<B: UniformBlock> {
    this: Weak<Skin<B>>,
    state: Mutex<SkinState<B>>,
}

impl<B: UniformBlock + 'static> Skin<B> {
    pub const COMPONENT_TYPE: i64 = component_type("Skin");

    /// Create an empty skin driven by `skeleton`.
    ///
    /// The skin only keeps a weak reference to the skeleton.
    pub fn new(skeleton: &Arc<dyn Skeleton>, config: SkinConfig) -> Arc<Self> {
        let skin = Arc::new_cyclic(|this| Self {
            this: this.clone(),
            state: Mutex::new(SkinState {
                buffer: GpuSyncBuffer::new(config.label.clone()),
                config,
                enabled: true,
                owner: None,
                skeleton: Arc::downgrade(skeleton),
                bone_map: BoneMap::default(),
                inverse_bind_pose: InverseBindPose::default(),
                ancestor: None,
                skinning: Vec::new(),
            }),
        });
        skeleton.root_node().subscribe(skin.listener());
        skin
    }

    fn lock(&self) -> MutexGuard<'_, SkinState<B>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn listener(&self) -> Weak<dyn HierarchyListener> {
        self.this.clone()
    }

    /// Attach the skin to the node holding the skinned mesh.
    pub fn set_owner(&self, owner: Option<&Arc<Node>>) {
        let mut state = self.lock();
        let old_owner = state.owner.take().and_then(|owner| owner.upgrade());
        state.owner = owner.map(Arc::downgrade);
        state.invalidate_ancestor();
        state.unsubscribe_stale(old_owner, &self.listener());
        if let Some(owner) = owner {
            owner.subscribe(self.listener());
        }
    }

    pub fn owner(&self) -> Option<Arc<Node>> {
        self.lock().owner.as_ref().and_then(Weak::upgrade)
    }

    pub fn has_owner(&self) -> bool {
        self.owner().is_some()
    }

    pub fn enable(&self) {
        self.lock().enabled = true;
    }

    /// A disabled skin keeps its data but never uploads.
    pub fn disable(&self) {
        self.lock().enabled = false;
    }

    pub fn is_enabled(&self) -> bool {
        self.lock().enabled
    }

    pub fn num_bones(&self) -> usize {
        self.lock().bone_map.len()
    }

    pub fn bone_map(&self) -> Vec<i32> {
        self.lock().bone_map.as_slice().to_vec()
    }

    /// Replace the slot -> bone mapping.
    ///
    /// Indices are checked against the skeleton if it is still alive,
    /// otherwise on the next [`Skin::update_gpu`]. A new slot count resets
    /// the inverse bind pose to identity and releases the uniform block.
    pub fn set_bone_map(&self, indices: &[i32]) -> Result<()> {
        let mut state = self.lock();
        let num_skeleton_bones = state.skeleton.upgrade().map(|skeleton| skeleton.num_bones());
        let bone_map = BoneMap::new(indices, state.config.max_bones, num_skeleton_bones)?;
        if bone_map.len() != state.bone_map.len() {
            state.inverse_bind_pose = InverseBindPose::identity(bone_map.len());
            state.buffer.release();
        }
        state.bone_map = bone_map;
        state.invalidate_ancestor();
        Ok(())
    }

    pub fn skeleton(&self) -> Option<Arc<dyn Skeleton>> {
        self.lock().skeleton.upgrade()
    }

    pub fn set_skeleton(&self, skeleton: &Arc<dyn Skeleton>) {
        let mut state = self.lock();
        let old_root = state.skeleton.upgrade().map(|old| old.root_node());
        state.skeleton = Arc::downgrade(skeleton);
        state.invalidate_ancestor();
        state.unsubscribe_stale(old_root, &self.listener());
        skeleton.root_node().subscribe(self.listener());
    }

    /// `data` holds `16 * num_bones()` floats of column-major matrices.
    pub fn set_inverse_bind_pose(&self, data: &[f32]) -> Result<()> {
        self.lock().inverse_bind_pose.set_from_floats(data)
    }

    pub fn set_inverse_bind_matrices(&self, matrices: &[Mat4]) -> Result<()> {
        self.lock().inverse_bind_pose.set(matrices)
    }

    /// Copy the inverse bind pose into `out`, which must hold exactly
    /// `16 * num_bones()` floats.
    pub fn inverse_bind_pose(&self, out: &mut [f32]) -> Result<()> {
        self.lock().inverse_bind_pose.copy_to_floats(out)
    }

    pub fn inverse_bind_matrices(&self) -> Vec<Mat4> {
        self.lock().inverse_bind_pose.matrices().to_vec()
    }

    /// Rescale the translation of every inverse bind matrix, e.g. after the
    /// mesh units changed.
    pub fn scale_positions(&self, factor: f32) -> Result<()> {
        self.lock().inverse_bind_pose.scale_positions(factor)
    }

    /// Force an upload on the next [`Skin::update_gpu`].
    pub fn invalidate(&self) {
        self.lock().buffer.mark_dirty();
    }

    /// Skinning matrices computed by the last [`Skin::update_gpu`].
    pub fn skinning_matrices(&self) -> Vec<Mat4> {
        self.lock().skinning.clone()
    }

    /// Create the uniform block for the shader's bone binding if needed.
    ///
    /// On allocation failure the skin stays usable and the next call retries.
    pub fn bind_buffer<R>(&self, renderer: &R, shader: &dyn Shader) -> Result<()>
    where
        R: Renderer<Block = B>,
    {
        let mut state = self.lock();
        let bones = state.bone_map.len();
        state.buffer.bind(renderer, shader, bones)
    }

    /// Recompute the skinning matrices and upload them if anything changed
    /// since the last upload. Returns whether an upload happened.
    pub fn update_gpu<R>(&self, renderer: &R, shader: &dyn Shader) -> Result<bool>
    where
        R: Renderer<Block = B>,
    {
        let mut state = self.lock();
        if !state.enabled {
            return Ok(false);
        }
        let Some(skeleton) = state.skeleton.upgrade() else {
            warn!("Skeleton of skin \"{}\" is gone, skip updating", state.config.label);
            return Ok(false);
        };
        state.bone_map.validate(skeleton.num_bones())?;

        let normalization = state.normalization(skeleton.as_ref());
        let SkinState {
            bone_map,
            inverse_bind_pose,
            skinning,
            buffer,
            ..
        } = &mut *state;
        compute_skinning_matrices(
            &normalization,
            skeleton.as_ref(),
            bone_map,
            inverse_bind_pose,
            skinning,
        );
        buffer.set_matrices(skinning);
        buffer.bind(renderer, shader, bone_map.len())?;
        buffer.sync(renderer)
    }

    /// Handle of the uniform block holding the bone matrices, valid until
    /// the bone count changes.
    pub fn uniform_block(&self) -> Option<Arc<B>> {
        self.lock().buffer.block()
    }
}

impl<B: UniformBlock + 'static> HierarchyListener for Skin<B> {
    fn hierarchy_changed(&self, node: &Node) {
        let mut state = self.lock();
        if !state.is_tracked(node) {
            return;
        }
        if state.ancestor.is_some() {
            debug!("Node #{} moved in hierarchy, dropping common parent", node.id());
        }
        state.invalidate_ancestor();
    }
}

#[cfg(test)]
mod test {
    use std::{
        sync::{atomic::Ordering, Arc, Barrier},
        thread,
    };

    use glam::{Mat4, Vec3, Vec4};

    use super::{component_type, Skin};
    use crate::{
        bone_map::UNUSED_BONE,
        config::SkinConfig,
        error::{ArgumentError, Error},
        gpu::testing::{bones_shader, MockBlock, MockRenderer, NoBonesShader},
        scene::{HierarchyListener, Node},
        skeleton::{PoseSkeleton, Skeleton},
    };

    struct Fixture {
        root: Arc<Node>,
        skeleton: Arc<PoseSkeleton>,
        skin: Arc<Skin<MockBlock>>,
    }

    fn fixture(num_bones: usize) -> Fixture {
        let root = Node::named("armature");
        let skeleton = Arc::new(PoseSkeleton::new(root.clone(), num_bones));
        let dyn_skeleton: Arc<dyn Skeleton> = skeleton.clone();
        let skin = Skin::new(&dyn_skeleton, SkinConfig::default());
        Fixture {
            root,
            skeleton,
            skin,
        }
    }

    fn matrices_of(block: &MockBlock) -> Vec<Mat4> {
        block
            .floats()
            .chunks_exact(16)
            .map(Mat4::from_cols_slice)
            .collect()
    }

    #[test]
    fn test_component_type() {
        assert_eq!(component_type(""), 98764321261);
        assert_eq!(component_type("a"), 98764321261 * 31 + 97);
        assert_eq!(Skin::<MockBlock>::COMPONENT_TYPE, component_type("Skin"));
    }

    #[test]
    fn test_new_skin_is_empty() {
        let fixture = fixture(3);
        assert_eq!(fixture.skin.num_bones(), 0);
        assert!(fixture.skin.inverse_bind_matrices().is_empty());
        assert!(fixture.skin.uniform_block().is_none());
        assert!(fixture.skin.is_enabled());
        assert!(!fixture.skin.has_owner());
    }

    #[test]
    fn test_num_bones_follows_bone_map() {
        let fixture = fixture(8);
        for indices in [vec![], vec![0], vec![7, 6, 5, 4, 3]] {
            fixture.skin.set_bone_map(&indices).unwrap();
            assert_eq!(fixture.skin.num_bones(), indices.len());
            assert_eq!(fixture.skin.inverse_bind_matrices().len(), indices.len());
            assert_eq!(fixture.skin.bone_map(), indices);
        }
    }

    #[test]
    fn test_out_of_range_bone_map() {
        let fixture = fixture(3);
        fixture.skin.set_bone_map(&[0, 1]).unwrap();

        let result = fixture.skin.set_bone_map(&[0, 1, 3]);
        assert_eq!(
            result,
            Err(Error::InvalidArgument(ArgumentError::BoneIndexOutOfRange {
                slot: 2,
                index: 3,
                num_bones: 3,
            }))
        );
        assert_eq!(fixture.skin.num_bones(), 2);
    }

    #[test]
    fn test_bone_map_limit() {
        let root = Node::new();
        let skeleton: Arc<dyn Skeleton> = Arc::new(PoseSkeleton::new(root, 4));
        let config = SkinConfig {
            max_bones: 2,
            ..Default::default()
        };
        let skin = Skin::<MockBlock>::new(&skeleton, config);
        assert!(skin.set_bone_map(&[0, 1, 2]).is_err());
        assert!(skin.set_bone_map(&[0, 1]).is_ok());
    }

    #[test]
    fn test_inverse_bind_pose_length_mismatch() {
        let fixture = fixture(3);
        fixture.skin.set_bone_map(&[0, 1, 2]).unwrap();
        let original = vec![Mat4::from_translation(Vec3::X); 3];
        fixture.skin.set_inverse_bind_matrices(&original).unwrap();

        let result = fixture.skin.set_inverse_bind_pose(&[0.0_f32; 32]);
        assert_eq!(
            result,
            Err(Error::InvalidArgument(ArgumentError::LengthMismatch {
                expected: 3,
                actual: 2,
            }))
        );
        assert_eq!(fixture.skin.inverse_bind_matrices(), original);

        let mut out = vec![0.0_f32; 16 * 3];
        fixture.skin.inverse_bind_pose(&mut out).unwrap();
        assert_eq!(&out[12..16], &[1.0, 0.0, 0.0, 1.0]);
        assert!(fixture.skin.inverse_bind_pose(&mut [0.0_f32; 16]).is_err());
    }

    #[test]
    fn test_same_length_bone_map_keeps_bind_pose() {
        let fixture = fixture(3);
        fixture.skin.set_bone_map(&[0, 1, 2]).unwrap();
        let pose = vec![Mat4::from_translation(Vec3::Y); 3];
        fixture.skin.set_inverse_bind_matrices(&pose).unwrap();

        fixture.skin.set_bone_map(&[2, 1, 0]).unwrap();
        assert_eq!(fixture.skin.inverse_bind_matrices(), pose);

        fixture.skin.set_bone_map(&[2, 1]).unwrap();
        assert_eq!(fixture.skin.inverse_bind_matrices(), vec![Mat4::IDENTITY; 2]);
    }

    #[test]
    fn test_identity_scenario() {
        let fixture = fixture(3);
        fixture.skin.set_owner(Some(&fixture.root));
        fixture.skin.set_bone_map(&[0, 1, 2]).unwrap();
        fixture
            .skin
            .set_inverse_bind_matrices(&[Mat4::IDENTITY; 3])
            .unwrap();

        let renderer = MockRenderer::default();
        assert!(fixture.skin.update_gpu(&renderer, &bones_shader()).unwrap());
        assert_eq!(fixture.skin.skinning_matrices(), vec![Mat4::IDENTITY; 3]);
        let block = fixture.skin.uniform_block().unwrap();
        assert_eq!(matrices_of(&block), vec![Mat4::IDENTITY; 3]);
    }

    #[test]
    fn test_scale_positions_scenario() {
        let fixture = fixture(3);
        fixture.skin.set_bone_map(&[0, 1, 2]).unwrap();
        let rotated = Mat4::from_rotation_x(0.5);
        let translated = Mat4::from_translation(Vec3::X) * rotated;
        fixture
            .skin
            .set_inverse_bind_matrices(&[translated; 3])
            .unwrap();

        fixture.skin.scale_positions(2.0).unwrap();
        for matrix in fixture.skin.inverse_bind_matrices() {
            assert_eq!(matrix.w_axis.truncate(), Vec3::new(2.0, 0.0, 0.0));
            assert_eq!(matrix.x_axis, rotated.x_axis);
            assert_eq!(matrix.y_axis, rotated.y_axis);
            assert_eq!(matrix.z_axis, rotated.z_axis);
        }

        fixture.skin.scale_positions(0.5).unwrap();
        for matrix in fixture.skin.inverse_bind_matrices() {
            assert!(matrix.abs_diff_eq(translated, 1e-6));
        }
    }

    #[test]
    fn test_upload_only_on_change() {
        let fixture = fixture(2);
        fixture.skin.set_bone_map(&[0, 1]).unwrap();
        let renderer = MockRenderer::default();
        let shader = bones_shader();

        assert!(fixture.skin.update_gpu(&renderer, &shader).unwrap());
        assert!(!fixture.skin.update_gpu(&renderer, &shader).unwrap());

        let moved = Mat4::from_translation(Vec3::Z);
        fixture.skeleton.set_bone_transform(1, moved).unwrap();
        assert!(fixture.skin.update_gpu(&renderer, &shader).unwrap());
        assert!(!fixture.skin.update_gpu(&renderer, &shader).unwrap());
        assert_eq!(
            matrices_of(&fixture.skin.uniform_block().unwrap()),
            vec![Mat4::IDENTITY, moved]
        );

        // Re-setting an identical bind pose changes no matrix.
        fixture.skin.set_inverse_bind_matrices(&[Mat4::IDENTITY; 2]).unwrap();
        fixture.skin.scale_positions(1.0).unwrap();
        assert!(!fixture.skin.update_gpu(&renderer, &shader).unwrap());

        let shifted = Mat4::from_translation(Vec3::Y);
        fixture.skin.set_inverse_bind_matrices(&[shifted; 2]).unwrap();
        assert!(fixture.skin.update_gpu(&renderer, &shader).unwrap());
        fixture.skin.set_bone_map(&[0, 1]).unwrap();
        assert!(!fixture.skin.update_gpu(&renderer, &shader).unwrap());
        fixture.skin.invalidate();
        assert!(fixture.skin.update_gpu(&renderer, &shader).unwrap());
        assert_eq!(renderer.uploads(), 4);
        assert_eq!(renderer.created(), 1);
    }

    #[test]
    fn test_bone_count_change_reallocates() {
        let fixture = fixture(3);
        let renderer = MockRenderer::default();
        let shader = bones_shader();
        fixture.skin.set_bone_map(&[0, 1]).unwrap();
        fixture.skin.bind_buffer(&renderer, &shader).unwrap();
        let first = fixture.skin.uniform_block().unwrap();

        fixture.skin.set_bone_map(&[1, 0]).unwrap();
        fixture.skin.bind_buffer(&renderer, &shader).unwrap();
        assert!(Arc::ptr_eq(&first, &fixture.skin.uniform_block().unwrap()));

        fixture.skin.set_bone_map(&[0, 1, 2]).unwrap();
        assert!(fixture.skin.uniform_block().is_none());
        assert!(fixture.skin.update_gpu(&renderer, &shader).unwrap());
        let second = fixture.skin.uniform_block().unwrap();
        assert_eq!(second.contents.lock().unwrap().len(), 3 * 64);
        assert_eq!(renderer.created(), 2);
    }

    #[test]
    fn test_allocation_retry() {
        let fixture = fixture(1);
        fixture.skin.set_bone_map(&[0]).unwrap();
        let renderer = MockRenderer::default();
        renderer.fail_allocation.store(true, Ordering::SeqCst);

        assert!(matches!(
            fixture.skin.bind_buffer(&renderer, &bones_shader()),
            Err(Error::Resource(_))
        ));
        assert!(fixture.skin.update_gpu(&renderer, &bones_shader()).is_err());

        renderer.fail_allocation.store(false, Ordering::SeqCst);
        assert!(fixture.skin.update_gpu(&renderer, &bones_shader()).unwrap());
    }

    #[test]
    fn test_missing_binding() {
        let fixture = fixture(1);
        fixture.skin.set_bone_map(&[0]).unwrap();
        let renderer = MockRenderer::default();
        assert_eq!(
            fixture.skin.bind_buffer(&renderer, &NoBonesShader),
            Err(Error::InvalidArgument(ArgumentError::MissingBinding))
        );
    }

    #[test]
    fn test_unused_slot() {
        let fixture = fixture(1);
        fixture.skin.set_bone_map(&[UNUSED_BONE, 0]).unwrap();
        fixture
            .skeleton
            .set_bone_transform(0, Mat4::from_translation(Vec3::X))
            .unwrap();
        let renderer = MockRenderer::default();
        fixture.skin.update_gpu(&renderer, &bones_shader()).unwrap();
        assert_eq!(
            fixture.skin.skinning_matrices(),
            vec![Mat4::IDENTITY, Mat4::from_translation(Vec3::X)]
        );
    }

    #[test]
    fn test_deferred_validation_after_skeleton_swap() {
        let fixture = fixture(4);
        fixture.skin.set_bone_map(&[3]).unwrap();

        let smaller: Arc<dyn Skeleton> = Arc::new(PoseSkeleton::new(fixture.root.clone(), 2));
        fixture.skin.set_skeleton(&smaller);
        let renderer = MockRenderer::default();
        assert!(matches!(
            fixture.skin.update_gpu(&renderer, &bones_shader()),
            Err(Error::InvalidArgument(ArgumentError::BoneIndexOutOfRange { .. }))
        ));
        assert_eq!(renderer.uploads(), 0);
    }

    #[test]
    fn test_dropped_skeleton() {
        let fixture = fixture(2);
        fixture.skin.set_bone_map(&[0, 1]).unwrap();
        let Fixture { skin, skeleton, .. } = fixture;
        drop(skeleton);

        assert!(skin.skeleton().is_none());
        // Validation waits for a live skeleton.
        skin.set_bone_map(&[5, 9]).unwrap();
        let renderer = MockRenderer::default();
        assert!(!skin.update_gpu(&renderer, &bones_shader()).unwrap());
    }

    #[test]
    fn test_disabled_skin_skips_upload() {
        let fixture = fixture(1);
        fixture.skin.set_bone_map(&[0]).unwrap();
        let renderer = MockRenderer::default();
        fixture.skin.disable();
        assert!(!fixture.skin.update_gpu(&renderer, &bones_shader()).unwrap());
        fixture.skin.enable();
        assert!(fixture.skin.update_gpu(&renderer, &bones_shader()).unwrap());

        fixture.skin.disable();
        fixture.skin.enable();
        assert!(!fixture.skin.update_gpu(&renderer, &bones_shader()).unwrap());
    }

    #[test]
    fn test_skeleton_swap_renormalizes() {
        let character = Node::named("character");
        let mesh = Node::named("mesh");
        let first_root = Node::with_transform("a", Mat4::from_translation(Vec3::X));
        let second_root = Node::with_transform("b", Mat4::from_translation(Vec3::Z * 3.0));
        for node in [&mesh, &first_root, &second_root] {
            node.set_parent(Some(&character)).unwrap();
        }
        let first: Arc<dyn Skeleton> = Arc::new(PoseSkeleton::new(first_root.clone(), 1));
        let second: Arc<dyn Skeleton> = Arc::new(PoseSkeleton::new(second_root.clone(), 1));

        let skin = Skin::<MockBlock>::new(&first, SkinConfig::default());
        skin.set_owner(Some(&mesh));
        skin.set_bone_map(&[0]).unwrap();
        let renderer = MockRenderer::default();
        let shader = bones_shader();
        assert!(skin.update_gpu(&renderer, &shader).unwrap());
        assert!(skin.skinning_matrices()[0]
            .w_axis
            .abs_diff_eq(Vec4::new(1.0, 0.0, 0.0, 1.0), 1e-6));

        skin.set_skeleton(&second);
        assert!(skin.update_gpu(&renderer, &shader).unwrap());
        assert!(skin.skinning_matrices()[0]
            .w_axis
            .abs_diff_eq(Vec4::new(0.0, 0.0, 3.0, 1.0), 1e-6));
        let ancestor = skin.lock().ancestor.as_ref().and_then(|cache| cache.ancestor());
        assert!(Arc::ptr_eq(&ancestor.unwrap(), &character));

        // The old root no longer reaches the skin.
        assert_eq!(first_root.listener_count(), 0);
        assert_eq!(second_root.listener_count(), 1);
    }

    #[test]
    fn test_former_owner_is_ignored() {
        let fixture = fixture(1);
        let character = Node::named("character");
        let old_mesh = Node::named("old mesh");
        let mesh = Node::named("mesh");
        for node in [&fixture.root, &old_mesh, &mesh] {
            node.set_parent(Some(&character)).unwrap();
        }
        fixture.skin.set_owner(Some(&old_mesh));
        fixture.skin.set_owner(Some(&mesh));
        fixture.skin.set_bone_map(&[0]).unwrap();
        fixture
            .skin
            .update_gpu(&MockRenderer::default(), &bones_shader())
            .unwrap();
        assert_eq!(old_mesh.listener_count(), 0);

        // A notification from a node the skin no longer tracks keeps the cache.
        fixture.skin.hierarchy_changed(&old_mesh);
        old_mesh.set_parent(None).unwrap();
        assert!(fixture.skin.lock().ancestor.is_some());

        mesh.set_parent(None).unwrap();
        assert!(fixture.skin.lock().ancestor.is_none());
    }

    #[test]
    fn test_normalization_through_common_parent() {
        let fixture = fixture(1);
        let character = Node::with_transform("character", Mat4::from_translation(Vec3::X * 10.0));
        let mesh = Node::with_transform("mesh", Mat4::from_translation(Vec3::Y));
        fixture.root.set_local_transform(Mat4::from_translation(Vec3::Z));
        fixture.root.set_parent(Some(&character)).unwrap();
        mesh.set_parent(Some(&character)).unwrap();

        fixture.skin.set_owner(Some(&mesh));
        fixture.skin.set_bone_map(&[0]).unwrap();
        let renderer = MockRenderer::default();
        fixture.skin.update_gpu(&renderer, &bones_shader()).unwrap();
        assert!(fixture.skin.skinning_matrices()[0]
            .abs_diff_eq(Mat4::from_translation(Vec3::new(0.0, -1.0, 1.0)), 1e-6));

        // Moving the armature is picked up without a structural change.
        fixture.root.set_local_transform(Mat4::from_translation(Vec3::Z * 2.0));
        assert!(fixture.skin.update_gpu(&renderer, &bones_shader()).unwrap());
        assert!(fixture.skin.skinning_matrices()[0]
            .abs_diff_eq(Mat4::from_translation(Vec3::new(0.0, -1.0, 2.0)), 1e-6));
    }

    #[test]
    fn test_reparent_invalidates_common_parent() {
        let fixture = fixture(1);
        let world = Node::named("world");
        let character = Node::named("character");
        let mesh = Node::with_transform("mesh", Mat4::from_translation(Vec3::Y));
        character.set_parent(Some(&world)).unwrap();
        fixture.root.set_parent(Some(&character)).unwrap();
        mesh.set_parent(Some(&character)).unwrap();
        fixture.skin.set_owner(Some(&mesh));
        fixture.skin.set_bone_map(&[0]).unwrap();

        let renderer = MockRenderer::default();
        let shader = bones_shader();
        fixture.skin.update_gpu(&renderer, &shader).unwrap();

        // The mesh leaves the character and lands under a shifted node.
        let holder = Node::with_transform("holder", Mat4::from_translation(Vec3::X * 5.0));
        holder.set_parent(Some(&world)).unwrap();
        mesh.set_parent(Some(&holder)).unwrap();
        assert!(fixture.skin.update_gpu(&renderer, &shader).unwrap());

        let expected = mesh.world_transform().inverse() * fixture.root.world_transform();
        assert!(fixture.skin.skinning_matrices()[0].abs_diff_eq(expected, 1e-6));
    }

    #[test]
    fn test_concurrent_update_and_render() {
        const FRAMES: usize = 200;
        let fixture = fixture(4);
        fixture.skin.set_bone_map(&[0, 1, 2, 3]).unwrap();
        let renderer = MockRenderer::default();
        let shader = bones_shader();
        let barrier = Barrier::new(2);

        thread::scope(|scope| {
            scope.spawn(|| {
                for frame in 0..FRAMES {
                    let offset = Vec3::X * frame as f32;
                    fixture
                        .skin
                        .set_inverse_bind_matrices(&[Mat4::from_translation(offset); 4])
                        .unwrap();
                    barrier.wait();
                    barrier.wait();
                }
            });
            scope.spawn(|| {
                for frame in 0..FRAMES {
                    barrier.wait();
                    fixture.skin.update_gpu(&renderer, &shader).unwrap();
                    let uploaded = matrices_of(&fixture.skin.uniform_block().unwrap());
                    let expected = Mat4::from_translation(Vec3::X * frame as f32);
                    assert!(uploaded.iter().all(|matrix| *matrix == expected));
                    barrier.wait();
                }
            });
        });
        assert_eq!(renderer.uploads(), FRAMES);
    }

    #[test]
    fn test_concurrent_writes_never_tear() {
        let fixture = fixture(8);
        fixture.skin.set_bone_map(&[0, 1, 2, 3, 4, 5, 6, 7]).unwrap();
        let renderer = MockRenderer::default();
        let shader = bones_shader();

        thread::scope(|scope| {
            scope.spawn(|| {
                for frame in 0..500 {
                    let value = Mat4::from_translation(Vec3::Y * (frame % 7) as f32);
                    fixture.skin.set_inverse_bind_matrices(&[value; 8]).unwrap();
                }
            });
            scope.spawn(|| {
                for _ in 0..500 {
                    fixture.skin.update_gpu(&renderer, &shader).unwrap();
                    let uploaded = matrices_of(&fixture.skin.uniform_block().unwrap());
                    assert!(uploaded.windows(2).all(|pair| pair[0] == pair[1]));
                }
            });
        });
    }
}
