//! End-to-end facade tests against the deterministic in-process engine.

use vectext_core::{BridgeConfig, BridgeError};
use vectext_engine::{share, MockEngine, ModelFixture, SharedEngine, TextEngine};
use vectext_model::{ModelSource, PredictOptions, TextModel};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("vectext=debug")
        .try_init();
}

/// A small language-identification fixture. The label vectors are the exact
/// sentence vectors of their training tokens, so predictions are stable.
fn langid_model() -> Vec<u8> {
    ModelFixture::new(32)
        .word("Hello,", 12)
        .word("world.", 11)
        .word("This", 10)
        .word("is", 9)
        .word("english", 8)
        .word("Bonjour", 7)
        .word("le", 6)
        .word("monde", 5)
        .label_for_words(
            "__label__en",
            20,
            &["Hello,", "world.", "This", "is", "english"],
        )
        .label_for_words("__label__fr", 15, &["Bonjour", "le", "monde"])
        .build()
}

fn loaded_model() -> (TextModel, SharedEngine) {
    let engine = share(MockEngine::new());
    let mut model = TextModel::new(engine.clone());
    futures_block(model.load(langid_model())).unwrap();
    (model, engine)
}

/// Drive a load future to completion on a throwaway runtime.
fn futures_block<T>(fut: impl std::future::Future<Output = T>) -> T {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(fut)
}

#[test]
fn dimension_is_positive_and_stable() {
    let (model, _engine) = loaded_model();
    let first = model.dimension().unwrap();
    assert!(first > 0);
    for _ in 0..5 {
        assert_eq!(model.dimension().unwrap(), first);
    }
    assert!(!model.is_quant().unwrap());
}

#[test]
fn word_vector_has_model_dimension() {
    let (model, _engine) = loaded_model();
    let dim = model.dimension().unwrap() as usize;
    assert_eq!(model.word_vector("english").unwrap().len(), dim);
    // Out-of-vocabulary words still produce a full-width vector.
    assert_eq!(model.word_vector("nonesuch").unwrap().len(), dim);
}

#[test]
fn sentence_vector_normalizes_trailing_newline() {
    let (model, _engine) = loaded_model();
    let bare = model.sentence_vector("Hello, world.").unwrap();
    let terminated = model.sentence_vector("Hello, world.\n").unwrap();
    assert_eq!(bare, terminated);
}

#[test]
fn predict_caps_results_and_applies_threshold() {
    let (model, _engine) = loaded_model();

    let results = model
        .predict("Hello, world.", PredictOptions { k: 1, threshold: 0.0 })
        .unwrap();
    assert_eq!(results.len(), 1);

    let results = model
        .predict(
            "Hello, world.",
            PredictOptions {
                k: 10,
                threshold: 0.0,
            },
        )
        .unwrap();
    assert!(results.len() <= 10);
    for entry in results.to_vec().unwrap() {
        assert!(entry.score >= 0.0);
    }

    let results = model
        .predict(
            "Hello, world.",
            PredictOptions {
                k: 10,
                threshold: 0.99999,
            },
        )
        .unwrap();
    for entry in results.to_vec().unwrap() {
        assert!(entry.score >= 0.99999);
    }
}

#[test]
fn identify_resolves_english() {
    init_tracing();
    let (model, _engine) = loaded_model();

    let results = model
        .predict(
            "Hello, world. This is english",
            PredictOptions { k: 1, threshold: 0.0 },
        )
        .unwrap();
    assert_eq!(results.len(), 1);
    let top = results.get(0).unwrap();
    assert_eq!(top.label, "__label__en");

    let language = model
        .identify("Hello, world. This is english")
        .unwrap()
        .expect("top prediction resolves");
    assert_eq!(language.name, "English");
    assert_eq!(language.alpha3, "eng");
    assert_eq!(language.alpha2.as_deref(), Some("en"));
}

#[test]
fn identify_returns_none_for_unknown_code() {
    let engine = share(MockEngine::new());
    let mut model = TextModel::new(engine);
    let bytes = ModelFixture::new(8)
        .word("blorp", 3)
        .label_for_words("__label__zz", 2, &["blorp"])
        .build();
    futures_block(model.load(bytes)).unwrap();

    assert_eq!(model.identify("blorp").unwrap(), None);
}

#[test]
fn word_id_uses_sentinel_for_unseen_tokens() {
    let (model, _engine) = loaded_model();
    assert!(model.word_id("english").unwrap() >= 0);
    assert_eq!(model.word_id("__never_seen_token__").unwrap(), -1);
}

#[test]
fn subword_ids_are_stable() {
    let (model, _engine) = loaded_model();
    let first = model.subword_id("ello").unwrap();
    assert_eq!(model.subword_id("ello").unwrap(), first);
    assert!(first >= 0);
    assert_eq!(model.subword_id("").unwrap(), -1);

    let (tokens, ids) = model.subwords("english").unwrap();
    assert_eq!(tokens.len(), ids.len());
    assert_eq!(tokens[0], "english");
}

#[test]
fn operations_before_load_fail_fast() {
    let engine = share(MockEngine::new());
    let model = TextModel::new(engine);

    assert!(matches!(model.dimension(), Err(BridgeError::ModelNotLoaded)));
    assert!(matches!(model.is_quant(), Err(BridgeError::ModelNotLoaded)));
    assert!(matches!(
        model.word_vector("x"),
        Err(BridgeError::ModelNotLoaded)
    ));
    assert!(matches!(
        model.predict("x", PredictOptions::default()),
        Err(BridgeError::ModelNotLoaded)
    ));
    assert!(matches!(model.words(), Err(BridgeError::ModelNotLoaded)));
    assert!(matches!(
        model.input_matrix(),
        Err(BridgeError::ModelNotLoaded)
    ));
    assert!(matches!(
        model.save_model(),
        Err(BridgeError::ModelNotLoaded)
    ));
}

#[test]
fn failed_load_leaves_handle_unusable_and_no_residue() {
    let engine = share(MockEngine::new());
    let mut model = TextModel::new(engine.clone());

    let err = futures_block(model.load(b"garbage".to_vec())).unwrap_err();
    assert!(matches!(err, BridgeError::ModelLoad { .. }));
    assert!(matches!(model.dimension(), Err(BridgeError::ModelNotLoaded)));
    assert!(engine.lock().read_file("model.bin").is_err());
}

#[test]
fn quantized_models_hide_matrices_but_serve_vectors() {
    let engine = share(MockEngine::new());
    let mut model = TextModel::new(engine);
    let bytes = ModelFixture::new(16)
        .quantized(true)
        .word("packed", 4)
        .label_for_words("__label__en", 2, &["packed"])
        .build();
    futures_block(model.load(bytes)).unwrap();

    assert!(model.is_quant().unwrap());
    assert!(matches!(
        model.input_matrix(),
        Err(BridgeError::QuantizedModel)
    ));
    assert!(matches!(
        model.output_matrix(),
        Err(BridgeError::QuantizedModel)
    ));
    // Vector and prediction paths are unaffected by quantization.
    assert_eq!(model.word_vector("packed").unwrap().len(), 16);
    let results = model.predict("packed", PredictOptions::default()).unwrap();
    assert_eq!(results.len(), 1);
}

#[test]
fn matrix_views_read_cells_and_check_bounds() {
    let (model, _engine) = loaded_model();

    let output = model.output_matrix().unwrap();
    assert_eq!(output.rows(), 2);
    assert_eq!(output.cols(), 32);
    let value = output.at(0, 0).unwrap();
    assert!(value.is_finite());
    assert!(matches!(
        output.at(2, 0),
        Err(BridgeError::IndexOutOfRange { .. })
    ));
    assert!(matches!(
        output.at(0, 32),
        Err(BridgeError::IndexOutOfRange { .. })
    ));

    let input = model.input_matrix().unwrap();
    assert!(input.rows() > 8);
    assert_eq!(input.cols(), 32);
    // Row 0 of the input matrix is the first vocabulary word's vector.
    let from_matrix = input.at(0, 0).unwrap();
    let from_vector = model.word_vector("Hello,").unwrap()[0];
    assert_eq!(from_matrix, from_vector);
}

#[test]
fn input_vector_matches_vocabulary_row() {
    let (model, _engine) = loaded_model();
    let row = model.word_id("This").unwrap();
    assert!(row >= 0);
    let via_row = model.input_vector(row as u64).unwrap();
    let via_word = model.word_vector("This").unwrap();
    assert_eq!(via_row, via_word);
}

#[test]
fn dictionary_listings_expose_counts() {
    let (model, _engine) = loaded_model();

    let words = model.words().unwrap();
    assert_eq!(words.len(), 8);
    assert_eq!(words.get(0).unwrap(), ("Hello,".to_string(), 12));

    let labels = model.labels().unwrap();
    assert_eq!(labels.len(), 2);
    assert_eq!(labels.get(0).unwrap().0, "__label__en");
}

#[test]
fn get_line_splits_words_and_labels() {
    let (model, _engine) = loaded_model();
    let line = model.get_line("__label__en Hello, world.").unwrap();
    assert_eq!(line.labels_len(), 1);
    assert_eq!(line.words_len(), 2);
    assert_eq!(line.label_at(0).unwrap(), "__label__en");
    assert_eq!(line.word_at(0).unwrap(), "Hello,");
}

#[test]
fn save_model_bytes_reload_equivalently() {
    let (model, _engine) = loaded_model();
    let bytes = model.save_model().unwrap();

    let second_engine = share(MockEngine::new());
    let mut second = TextModel::new(second_engine);
    futures_block(second.load(bytes)).unwrap();

    assert_eq!(second.dimension().unwrap(), model.dimension().unwrap());
    assert_eq!(second.is_quant().unwrap(), model.is_quant().unwrap());
    assert_eq!(
        second.word_id("english").unwrap(),
        model.word_id("english").unwrap()
    );
}

#[test]
fn analogies_return_ranked_vocabulary() {
    let (model, _engine) = loaded_model();
    let results = model.analogies("Hello,", "Bonjour", "monde", 3).unwrap();
    let entries = results.to_vec().unwrap();
    assert!(!entries.is_empty());
    assert!(entries.len() <= 3);
    for pair in entries.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
}

#[test]
fn repeated_facade_calls_do_not_leak_arena_memory() {
    let (model, engine) = loaded_model();
    let baseline = engine.lock().arena_in_use();

    for _ in 0..25 {
        model.word_vector("english").unwrap();
        model.sentence_vector("Hello, world.").unwrap();
        let mut results = model
            .predict("Bonjour le monde", PredictOptions { k: 2, threshold: 0.0 })
            .unwrap();
        results.dispose().unwrap();
        model.identify("Hello, world. This is english").unwrap();
    }

    assert_eq!(engine.lock().arena_in_use(), baseline);
}

#[tokio::test]
async fn load_from_path_retrieves_bytes_asynchronously() {
    let path = std::env::temp_dir().join(format!("vectext-e2e-{}.bin", std::process::id()));
    std::fs::write(&path, langid_model()).unwrap();

    let engine = share(MockEngine::new());
    let mut model = TextModel::new(engine);
    let info = model.load(ModelSource::Path(path.clone())).await.unwrap();
    assert_eq!(info.dimension, 32);

    std::fs::remove_file(&path).ok();
}

#[tokio::test]
async fn load_from_missing_path_is_io_error() {
    let engine = share(MockEngine::new());
    let mut model = TextModel::new(engine);
    let err = model
        .load(ModelSource::Path("/nonexistent/vectext/model.bin".into()))
        .await
        .unwrap_err();
    assert!(matches!(err, BridgeError::Io(_)));
}

#[test]
fn custom_label_prefix_is_honored() {
    let engine = share(MockEngine::new());
    let config = BridgeConfig::default().with_label_prefix("__lang__");
    let mut model = TextModel::with_config(engine, config);
    let bytes = ModelFixture::new(8)
        .label_prefix("__lang__")
        .word("hola", 3)
        .word("mundo", 2)
        .label_for_words("__lang__es", 2, &["hola", "mundo"])
        .build();
    futures_block(model.load(bytes)).unwrap();

    let language = model.identify("hola mundo").unwrap().expect("resolves");
    assert_eq!(language.name, "Spanish");
}
