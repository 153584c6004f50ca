//! Upload and read-back through a real device.

use photon_gpu::{DeviceBuilder, StructuredBuffer, Texture, TextureFormat};

#[test]
#[ignore = "Requires GPU hardware"]
fn structured_buffer_round_trip() {
    let mut device = DeviceBuilder::new()
        .validation(false)
        .build_headless(64, 64)
        .unwrap();

    // Odd length exercises a copy that is not a multiple of any alignment
    let data: Vec<u8> = (0..1021u32).map(|i| (i * 31 % 256) as u8).collect();
    let buffer = StructuredBuffer::init(&mut device, 1, 1021, &data, "bytes").unwrap();
    assert_eq!(buffer.read_back(&mut device).unwrap(), data);
    assert_eq!(buffer.element_count(), 1021);
}

#[test]
#[ignore = "Requires GPU hardware"]
fn texture_round_trip_with_row_realignment() {
    let mut device = DeviceBuilder::new()
        .validation(false)
        .build_headless(64, 64)
        .unwrap();

    // 3 pixels per row gives a 12 byte row against a 256 byte pitch
    let pixels: Vec<u8> = (0..3 * 5 * 4).map(|i| i as u8).collect();
    let texture =
        Texture::upload(&mut device, 3, 5, TextureFormat::Rgba8Unorm, &pixels, "tex").unwrap();
    assert_eq!(texture.read_back(&mut device).unwrap(), pixels);
}

#[test]
#[ignore = "Requires GPU hardware"]
fn render_target_owns_first_slot() {
    let mut device = DeviceBuilder::new()
        .validation(false)
        .build_headless(32, 16)
        .unwrap();
    assert_eq!(device.render_target().slot().index, 0);
    assert_eq!(device.size(), (32, 16));

    device.reset_command_list().unwrap();
    assert!(device.resize(64, 64).is_err());
    device.present_frame().unwrap();

    let before = device.fence_value();
    device.resize(64, 64).unwrap();
    assert_eq!(device.size(), (64, 64));
    assert_eq!(device.render_target().slot().index, 0);
    assert!(device.fence_value() > before);
}
