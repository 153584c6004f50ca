//! Loading a scene directory onto a real device.

use photon_gpu::DeviceBuilder;
use photon_rt::Scene;
use photon_scene::{load_scene, FileDecoder, LoadContext, ObjMeshSource, SceneDescription};
use std::path::PathBuf;

const QUAD: &str = "\
v -1 0 -1
v 1 0 -1
v 1 0 1
v -1 0 1
vn 0 1 0
f 1//1 3//1 2//1
f 1//1 4//1 3//1
";

const SCENE: &str = r#"{
    "width": 64, "height": 64,
    "from": [0, 2, 5], "to": [0, 0, 0], "up": [0, 1, 0],
    "instances": [
        { "meshFilename": "floor.obj", "material": { "bsdf": "diffuse" } },
        {
            "meshFilename": "light.obj",
            "material": { "emission": "8 8 8" },
            "w": [1, 0, 0, 0, 0, -1, 0, 3, 0, 0, 1, 0, 0, 0, 0, 1]
        }
    ]
}"#;

fn write_scene(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("photon-scene-{name}-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("scene.json"), SCENE).unwrap();
    std::fs::write(dir.join("floor.obj"), QUAD).unwrap();
    std::fs::write(dir.join("light.obj"), QUAD).unwrap();
    dir
}

#[test]
#[ignore = "Requires GPU hardware"]
fn emissive_scene_loads_and_builds() {
    let dir = write_scene("emissive");
    let mut device = DeviceBuilder::new()
        .validation(false)
        .build_headless(64, 64)
        .unwrap();
    let mut scene = Scene::new(&device, 16).unwrap();
    let mut ctx = LoadContext::new();

    let description = SceneDescription::load(&dir).unwrap();
    let loaded = load_scene(
        &mut ctx,
        &mut device,
        &dir,
        &description,
        scene.contents_mut(),
        &ObjMeshSource,
    )
    .unwrap();
    assert_eq!(loaded.environment.luminance, 0.0);
    assert_eq!((loaded.camera.width, loaded.camera.height), (64, 64));

    let table = ctx.textures.upload_all(&mut device, &FileDecoder).unwrap();
    assert_eq!(table.len(), 2);
    scene.set_texture_table(table.base());
    scene.set_environment_map(table.slot(loaded.environment.texture).unwrap(), loaded.environment.luminance);
    scene.build(&mut device, &ctx.meshes).unwrap();

    assert_eq!(scene.instance_count(), 2);
    assert_eq!(scene.light_count(), 2);
    assert_eq!(ctx.meshes.len(), 2);
    // The mirrored light faces down
    for light in scene.contents().lights() {
        assert!(light.normal[1] < 0.0);
    }

    std::fs::remove_dir_all(&dir).ok();
}
