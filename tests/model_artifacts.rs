mod common;

use deepfracture::model::{DecoderArtifact, EncoderArtifact, ModelLoadError};
use deepfracture::{Fidelity, ModelRegistry, QuantizedLatentDecoder, ShapeId};
use serde_json::Value;

const LATENT: usize = 4;
const CODE: usize = 6;

fn save_model(dir: &std::path::Path, shape: &str) {
    let shape_dir = dir.join(shape);
    common::encoder(LATENT)
        .save(shape_dir.join(format!("{}-encoder.json", shape)))
        .unwrap();
    common::decoder(CODE)
        .save(shape_dir.join(format!("{}-decoder.json", shape)))
        .unwrap();
}

/// Rewrite an artifact in the version-1 layout.
fn downgrade(mut value: Value, renames: &[(&str, &str)], drops: &[&str]) -> Value {
    let map = value.as_object_mut().unwrap();
    map.remove("format_version");
    for (from, to) in renames {
        let v = map.remove(*from).unwrap();
        map.insert(to.to_string(), v);
    }
    for key in drops {
        map.remove(*key);
    }
    value
}

#[test]
fn test_decode_is_deterministic() {
    let dir = common::temp_dir("determinism");
    save_model(&dir, "bowl");
    let model = QuantizedLatentDecoder::load(&dir, &ShapeId::new("bowl")).unwrap();

    let (pos, dir_v, imp) = ([0.2, -0.1, 0.4], [0.0, 1.0, 0.0], [0.3]);
    let a = model.decode(&pos, &dir_v, &imp, None, Fidelity::Mid).unwrap();
    let b = model.decode(&pos, &dir_v, &imp, None, Fidelity::Mid).unwrap();
    assert_eq!(a.code_index, b.code_index);
    assert_eq!(a.field.resolution(), 16);
    let bits = |f: &deepfracture::VolumetricField| f.data().iter().map(|v| v.to_bits()).collect::<Vec<_>>();
    assert_eq!(bits(&a.field), bits(&b.field));

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_nearest_row_under_perturbation() {
    let decoder = common::decoder(CODE);
    let model = QuantizedLatentDecoder::from_artifacts(&common::encoder(LATENT), &decoder, None).unwrap();

    for k in 0..decoder.codebook.shape[0] {
        let row: Vec<f32> = decoder.codebook.data[k * CODE..(k + 1) * CODE]
            .iter()
            .enumerate()
            .map(|(i, v)| v + if i % 2 == 0 { 1e-4 } else { -1e-4 })
            .collect();
        let entry = model.quantize(&row[..LATENT], Some(&row[LATENT..])).unwrap();
        assert_eq!(entry.index, k, "perturbed row {} matched {}", k, entry.index);
    }
}

#[test]
fn test_low_fidelity_downsamples_mid() {
    let model =
        QuantizedLatentDecoder::from_artifacts(&common::encoder(LATENT), &common::decoder(CODE), None).unwrap();
    let args = ([0.0, 0.5, 0.0], [1.0, 0.0, 0.0], [-0.2]);
    let mid = model.decode(&args.0, &args.1, &args.2, None, Fidelity::Mid).unwrap();
    let low = model.decode(&args.0, &args.1, &args.2, None, Fidelity::Low).unwrap();
    assert_eq!(low.field.resolution(), 8);
    assert_eq!(low.field, mid.field.downsample_nearest(8));
}

#[test]
fn test_version_one_artifacts_decode_identically() {
    let dir = common::temp_dir("compat");
    save_model(&dir, "current");

    let legacy_dir = dir.join("legacy");
    std::fs::create_dir_all(&legacy_dir).unwrap();
    let encoder = downgrade(serde_json::to_value(common::encoder(LATENT)).unwrap(), &[], &["w0"]);
    let decoder = downgrade(
        serde_json::to_value(common::decoder(CODE)).unwrap(),
        &[("codebook", "cookbook")],
        &["batch_norm_eps", "shape_slices"],
    );
    std::fs::write(legacy_dir.join("legacy-encoder.json"), encoder.to_string()).unwrap();
    std::fs::write(legacy_dir.join("legacy-decoder.json"), decoder.to_string()).unwrap();

    let legacy = ShapeId::new("legacy");
    let current = ShapeId::new("current");
    let registry = ModelRegistry::load(&dir, [&legacy, &current]).unwrap();
    assert_eq!(registry.len(), 2);

    let query = ([0.1, 0.1, -0.3], [0.0, 0.0, 1.0], [0.8]);
    let a = registry
        .get(&legacy)
        .unwrap()
        .decode(&query.0, &query.1, &query.2, None, Fidelity::Mid)
        .unwrap();
    let b = registry
        .get(&current)
        .unwrap()
        .decode(&query.0, &query.1, &query.2, None, Fidelity::Mid)
        .unwrap();
    assert_eq!(a.code_index, b.code_index);
    assert_eq!(a.field, b.field);

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_load_failures() {
    let dir = common::temp_dir("failures");

    let missing = QuantizedLatentDecoder::load(&dir, &ShapeId::new("nothing"));
    assert!(matches!(missing, Err(ModelLoadError::Missing(_))), "{:?}", missing.err());

    let future = dir.join("future.json");
    let mut value = serde_json::to_value(common::encoder(LATENT)).unwrap();
    value["format_version"] = Value::from(99);
    std::fs::write(&future, value.to_string()).unwrap();
    assert!(matches!(
        EncoderArtifact::load(&future),
        Err(ModelLoadError::UnsupportedVersion { version: 99, .. })
    ));

    let garbled = dir.join("garbled.json");
    std::fs::write(&garbled, "{\"format_version\": 2, \"data_shape\": ").unwrap();
    assert!(matches!(DecoderArtifact::load(&garbled), Err(ModelLoadError::Json { .. })));

    // Codebook narrower than the decoder input.
    let mut decoder = common::decoder(CODE);
    decoder.codebook = deepfracture::model::Tensor::zeros(vec![8, CODE - 1]);
    let inconsistent = QuantizedLatentDecoder::from_artifacts(&common::encoder(LATENT), &decoder, None);
    assert!(inconsistent.is_err());

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_shape_mismatch_on_wrong_arity() {
    let model =
        QuantizedLatentDecoder::from_artifacts(&common::encoder(LATENT), &common::decoder(CODE), None).unwrap();
    let err = model
        .decode(&[0.0, 0.0], &[0.0, 1.0, 0.0], &[0.5], None, Fidelity::Mid)
        .unwrap_err();
    assert_eq!(err.expected, 3);
    assert_eq!(err.actual, 2);
}
