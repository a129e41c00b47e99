mod common;

use common::{ConstantEngine, NiftiBuilder, ThresholdEngine, Transform, diagonal_sform, gzip};
use mri_segment::enums::ErrorKind;
use mri_segment::{ConformSettings, ModelService, Segmenter, SpatialFrame, Volume};
use ndarray::Array3;
use std::sync::Arc;

fn small_segmenter(engine: ThresholdEngine, edge: usize) -> Segmenter {
    Segmenter::with_settings(
        Arc::new(ModelService::with_engine(Box::new(engine))),
        ConformSettings {
            cube_edge: edge,
            target_spacing: 1.0,
        },
    )
}

#[test]
fn uniform_conformed_volume_passes_through_unchanged() {
    let segmenter = Segmenter::new(Arc::new(ModelService::with_engine(Box::new(ConstantEngine {
        classes: 2,
        label: 1,
    }))));
    let volume = Volume::new(
        Array3::from_elem((256, 256, 256), 5.0),
        SpatialFrame::canonical((1.0, 1.0, 1.0)),
    );

    let prepared = segmenter.prepare(&volume).unwrap();
    assert_eq!(prepared.resampled_shape, [256, 256, 256]);
    assert!(prepared.mapping.is_identity());
    assert_eq!(prepared.mapping.source_offsets(), [0, 0, 0]);
    assert_eq!(prepared.mapping.destination_offsets(), [0, 0, 0]);
    assert!(prepared.cube.data.iter().all(|&v| v == 5.0));

    let cube_labels = segmenter.infer_cube(&prepared.cube).unwrap();
    let labels = prepared.mapping.restore(&cube_labels).unwrap();
    assert_eq!(labels.dim(), (256, 256, 256));
    assert!(labels.iter().all(|&l| l < 2));
}

#[test]
fn anisotropic_lpi_volume_is_segmented_in_ras_space() {
    let engine = ThresholdEngine::default();
    let segmenter = small_segmenter(engine.clone(), 8);
    // single bright voxel at the left/posterior/inferior corner of the array
    let bytes = NiftiBuilder::from_fn([4, 3, 5], |x, y, z| if (x, y, z) == (0, 0, 0) { 10.0 } else { 0.0 })
        .spacing([2.0, 1.0, 1.0])
        .transform(Transform::Sform(diagonal_sform(-2.0, -1.0, -1.0)))
        .build_gz();

    let segmentation = segmenter.segment_file(&bytes, "scan.nii.gz").unwrap();
    let context = &segmentation.context;
    assert_eq!(context.original_shape, [4, 3, 5]);
    assert_eq!(context.resampled_shape, [8, 3, 5]);
    assert_eq!(context.mapping.destination_offsets(), [0, 2, 1]);
    assert_eq!(segmentation.shape(), [8, 3, 5]);
    assert_eq!(engine.calls(), 1);

    // after flipping every axis the voxel sits at the far corner; the
    // interpolated neighbour at x = 6 carries 4/7 of its intensity
    let foreground: Vec<_> = segmentation
        .labels
        .indexed_iter()
        .filter(|&(_, &l)| l == 1)
        .map(|(index, _)| index)
        .collect();
    assert_eq!(foreground, vec![(6, 2, 4), (7, 2, 4)]);
    assert_eq!(segmentation.unique_labels(), vec![0, 1]);
}

#[test]
fn volume_larger_than_cube_is_cropped_and_padded_back_with_background() {
    let segmenter = small_segmenter(ThresholdEngine::default(), 4);
    let bytes = NiftiBuilder::from_fn([6, 4, 2], |_, _, _| 3.0)
        .transform(Transform::Sform(diagonal_sform(1.0, 1.0, 1.0)))
        .build();

    let segmentation = segmenter.segment_file(&bytes, "scan.nii").unwrap();
    assert_eq!(segmentation.shape(), [6, 4, 2]);
    assert_eq!(segmentation.context.mapping.source_offsets(), [1, 0, 0]);

    // z padding brings the cube minimum to zero, so the volume normalizes to one
    let labels = &segmentation.labels;
    assert_eq!(labels[[0, 0, 0]], 0);
    assert_eq!(labels[[5, 3, 1]], 0);
    assert!(labels.slice(ndarray::s![1..5, .., ..]).iter().all(|&l| l == 1));
}

#[test]
fn short_tensor_is_rejected_before_inference() {
    let engine = ThresholdEngine::default();
    let segmenter = small_segmenter(engine.clone(), 4);

    let err = segmenter.segment_tensor(&gzip(&[0u8; 63])).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
    let err = segmenter.segment_tensor(&[0u8; 63]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
    let err = segmenter.segment_tensor(&gzip(&vec![0u8; 1 << 20])).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
    assert_eq!(engine.calls(), 0);

    let cube: Vec<u8> = (0..64).map(|i| if i < 32 { 0 } else { 200 }).collect();
    let result = segmenter.segment_tensor(&gzip(&cube)).unwrap();
    assert_eq!(engine.calls(), 1);
    assert_eq!(result.labels.dim(), (4, 4, 4));
    assert_eq!(result.labels[[0, 0, 0]], 0);
    assert_eq!(result.labels[[3, 3, 3]], 1);
    assert!(result.total_seconds >= result.inference_seconds);
}

#[test]
fn unsupported_extension_never_reaches_the_decoder() {
    let engine = ThresholdEngine::default();
    let segmenter = small_segmenter(engine.clone(), 4);
    let err = segmenter.segment_file(b"not a volume", "scan.dcm").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);

    let err = segmenter.segment_file(b"not a volume", "scan.nii").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Decode);
    assert_eq!(engine.calls(), 0);
}

#[test]
fn missing_engine_is_an_engine_error() {
    let segmenter = Segmenter::with_settings(
        Arc::new(ModelService::from_model_path("does/not/exist.onnx")),
        ConformSettings {
            cube_edge: 4,
            target_spacing: 1.0,
        },
    );
    let err = segmenter.segment_tensor(&[1u8; 64]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Engine);
    assert!(!segmenter.model().is_loaded());
}
