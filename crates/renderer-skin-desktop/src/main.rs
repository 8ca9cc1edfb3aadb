use std::{
    error::Error,
    fs,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Barrier,
    },
    thread,
};

use glam::{Mat4, Quat, Vec3};
use log::{error, info};
use renderer_skin::{
    scene::Node,
    skeleton::{PoseSkeleton, Skeleton},
    Skin, SkinConfig,
};
use renderer_skin_wgpu::{
    bones_bind_group_layout, request_headless_device, SkinBlock, SkinShader, WgpuRenderer,
};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct DemoConfig {
    frames: usize,
    bones: usize,
    bone_length: f32,
    /// The pose is held still every this many frames.
    hold_every: usize,
    /// Mesh units are rescaled by this factor after binding.
    unit_scale: f32,
    skin: SkinConfig,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            frames: 120,
            bones: 4,
            bone_length: 0.5,
            hold_every: 4,
            unit_scale: 1.0,
            skin: SkinConfig::default(),
        }
    }
}

fn load_config() -> Result<DemoConfig, Box<dyn Error>> {
    match std::env::args().nth(1) {
        Some(path) => {
            info!("Loading config from {}", path);
            Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
        }
        None => Ok(DemoConfig::default()),
    }
}

// Bones form a chain along +Y, each `bone_length` above its parent.
fn rest_pose(config: &DemoConfig) -> Vec<Mat4> {
    (0..config.bones)
        .map(|index| Mat4::from_translation(Vec3::Y * config.bone_length * index as f32))
        .collect()
}

fn animated_pose(config: &DemoConfig, frame: usize) -> Vec<Mat4> {
    let angle = (frame as f32 * 0.05).sin() * 0.4;
    let bend = Mat4::from_quat(Quat::from_rotation_z(angle));
    let offset = Mat4::from_translation(Vec3::Y * config.bone_length);
    let mut transform = Mat4::IDENTITY;
    (0..config.bones)
        .map(|index| {
            if index > 0 {
                transform = transform * offset * bend;
            }
            transform
        })
        .collect()
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let config = load_config()?;

    let Some((device, queue)) = pollster::block_on(request_headless_device()) else {
        error!("Failed to acquire a graphic adapter");
        return Err("no graphic adapter".into());
    };
    let layout = bones_bind_group_layout(&device);

    let world = Node::named("world");
    let character = Node::with_transform("character", Mat4::from_translation(Vec3::X * 2.0));
    let armature = Node::named("armature");
    let mesh = Node::with_transform("mesh", Mat4::from_scale(Vec3::splat(config.unit_scale)));
    character.set_parent(Some(&world))?;
    armature.set_parent(Some(&character))?;
    mesh.set_parent(Some(&character))?;

    let skeleton = Arc::new(PoseSkeleton::new(armature.clone(), config.bones));
    let dyn_skeleton: Arc<dyn Skeleton> = skeleton.clone();
    let skin: Arc<Skin<SkinBlock>> = Skin::new(&dyn_skeleton, config.skin.clone());
    skin.set_owner(Some(&mesh));

    let bone_map: Vec<i32> = (0..config.bones as i32).collect();
    skin.set_bone_map(&bone_map)?;
    let inverse_bind: Vec<Mat4> = rest_pose(&config)
        .iter()
        .map(|matrix| matrix.inverse())
        .collect();
    skin.set_inverse_bind_matrices(&inverse_bind)?;
    if config.unit_scale != 1.0 {
        skin.scale_positions(1.0 / config.unit_scale)?;
    }

    let renderer = WgpuRenderer::new(&device, &queue, &layout);
    let shader = SkinShader::default();
    skin.bind_buffer(&renderer, &shader)?;

    let (updated, uploads) = run_frames(
        config.frames,
        |frame| {
            if config.hold_every == 0 || frame % config.hold_every != 0 {
                skeleton.set_pose(&animated_pose(&config, frame))?;
            }
            Ok(())
        },
        || skin.update_gpu(&renderer, &shader),
    );
    check(updated, "update")?;
    info!(
        "Uploaded bone matrices on {} of {} frames",
        check(uploads, "render")?,
        config.frames
    );
    Ok(())
}

type ThreadResult<T> = thread::Result<Result<T, renderer_skin::Error>>;

/// Run `update` and `render` in lockstep on two threads for `frames` frames.
///
/// Both threads pass both barriers every frame and leave together once
/// either of them failed. The render side counts frames that uploaded.
fn run_frames<U, R>(
    frames: usize,
    mut update: U,
    mut render: R,
) -> (ThreadResult<()>, ThreadResult<usize>)
where
    U: FnMut(usize) -> Result<(), renderer_skin::Error> + Send,
    R: FnMut() -> Result<bool, renderer_skin::Error> + Send,
{
    let barrier = Barrier::new(2);
    let abort = AtomicBool::new(false);
    thread::scope(|scope| {
        let updater = scope.spawn(|| {
            for frame in 0..frames {
                let result = update(frame);
                if result.is_err() {
                    abort.store(true, Ordering::SeqCst);
                }
                barrier.wait();
                barrier.wait();
                if abort.load(Ordering::SeqCst) {
                    return result;
                }
            }
            Ok(())
        });
        let renderer = scope.spawn(|| {
            let mut uploads = 0;
            for _ in 0..frames {
                barrier.wait();
                let result = if abort.load(Ordering::SeqCst) {
                    Ok(false)
                } else {
                    render()
                };
                match result {
                    Ok(true) => uploads += 1,
                    Ok(false) => {}
                    Err(_) => abort.store(true, Ordering::SeqCst),
                }
                barrier.wait();
                if abort.load(Ordering::SeqCst) {
                    return result.map(|_| uploads);
                }
            }
            Ok(uploads)
        });
        (updater.join(), renderer.join())
    })
}

fn check<T>(result: ThreadResult<T>, role: &str) -> Result<T, Box<dyn Error>> {
    match result {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => {
            error!("The {} thread failed: {}", role, err);
            Err(err.into())
        }
        Err(_) => Err(format!("{} thread panicked", role).into()),
    }
}
