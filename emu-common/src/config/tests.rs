use super::*;
use tempfile::TempDir;

fn base_config() -> EmuConfig {
    EmuConfig::from_toml_str(EMU_TEMPLATE).expect("template parses")
}

#[test]
fn test_template_parses_with_defaults() {
    let config = base_config();
    assert_eq!(config.sort_type, SortType::Emu);
    assert_eq!(config.data.dataset_type, DatasetType::Openephys);
    assert_eq!(config.data.emg_recordings, IndexSelection::All);
    assert!(!config.data.time_range_enabled());
    assert_eq!(config.num_groups(), 1);
    assert_eq!(config.sorting.num_ks_jobs, 1);
    assert_eq!(config.sorting.gridsearch_ks_params.len(), 2);
    assert_eq!(config.si.max_concurrent_tasks, 4);
    assert!(config.validate().is_ok());
}

#[test]
fn test_ks4_template_sets_sort_type() {
    let config = EmuConfig::from_toml_str(KS4_TEMPLATE).unwrap();
    assert_eq!(config.sort_type, SortType::Ks4);
}

#[test]
fn test_index_selection_forms() {
    #[derive(Deserialize)]
    struct Wrapper {
        sel: IndexSelection,
    }

    let all: Wrapper = toml::from_str(r#"sel = "all""#).unwrap();
    assert_eq!(all.sel, IndexSelection::All);

    let listed_all: Wrapper = toml::from_str(r#"sel = ["all"]"#).unwrap();
    assert_eq!(listed_all.sel, IndexSelection::All);

    let indices: Wrapper = toml::from_str("sel = [0, 2, 3]").unwrap();
    assert_eq!(indices.sel, IndexSelection::Indices(vec![0, 2, 3]));

    assert!(toml::from_str::<Wrapper>(r#"sel = "some""#).is_err());
    assert!(toml::from_str::<Wrapper>("sel = []").is_err());
}

#[test]
fn test_index_selection_resolve() {
    assert_eq!(IndexSelection::All.resolve(3), Ok(vec![0, 1, 2]));
    assert_eq!(IndexSelection::Indices(vec![2, 0]).resolve(3), Ok(vec![2, 0]));
    assert_eq!(IndexSelection::Indices(vec![0, 5]).resolve(3), Err(5));
}

#[test]
fn test_bad_channel_policy_parsing() {
    assert_eq!(
        BadChannelPolicy::parse("mad").unwrap(),
        BadChannelPolicy::Auto(BadChannelMethod::Mad)
    );
    assert_eq!(
        BadChannelPolicy::parse("std2.5").unwrap(),
        BadChannelPolicy::Threshold(BadChannelMethod::Std, 2.5)
    );
    assert_eq!(
        BadChannelPolicy::parse("coherence+psd").unwrap(),
        BadChannelPolicy::Auto(BadChannelMethod::CoherencePsd)
    );
    assert_eq!(BadChannelPolicy::parse("none").unwrap(), BadChannelPolicy::Disabled);

    assert!(BadChannelPolicy::parse("coherence+psd3").is_err());
    assert!(BadChannelPolicy::parse("mad0").is_err());
    assert!(BadChannelPolicy::parse("median").is_err());
    assert!(BadChannelPolicy::parse("mad1.2.3").is_err());
}

#[test]
fn test_bad_channel_policy_from_toml_values() {
    let config = EmuConfig::from_toml_str(&EMU_TEMPLATE.replace(
        r#"emg_chan_list = ["all"]
# false, true, "mad", "std", "mad3.5", "coherence+psd" or "none"
remove_bad_emg_chans = [false]"#,
        r#"emg_chan_list = [[0, 1], [2, 3], [4], [5]]
remove_bad_emg_chans = [false, true, "std3", "none"]"#,
    ))
    .unwrap();

    let group = &config.group;
    assert_eq!(group.bad_channel_policy(0), BadChannelPolicy::Off);
    assert_eq!(
        group.bad_channel_policy(1),
        BadChannelPolicy::Auto(BadChannelMethod::Mad)
    );
    assert_eq!(
        group.bad_channel_policy(2),
        BadChannelPolicy::Threshold(BadChannelMethod::Std, 3.0)
    );
    assert_eq!(group.bad_channel_policy(3), BadChannelPolicy::Disabled);
    assert!(group.bad_channel_policy(3).detection().is_none());
    assert!(!group.bad_channel_policy(0).removes_channels());
    assert!(group.bad_channel_policy(1).removes_channels());
}

#[test]
fn test_validate_rejects_inverted_time_range() {
    let mut config = base_config();
    config.data.emg_recordings = IndexSelection::Indices(vec![0]);
    config.data.time_range = [10.0, 5.0];
    assert!(matches!(config.validate(), Err(Error::Config(_))));

    config.data.time_range = [5.0, 10.0];
    assert!(config.validate().is_ok());
}

#[test]
fn test_validate_rejects_time_range_with_multiple_recordings() {
    let mut config = base_config();
    config.data.time_range = [0.0, 10.0];
    config.data.emg_recordings = IndexSelection::Indices(vec![0, 1]);
    assert!(matches!(config.validate(), Err(Error::Config(_))));

    config.data.emg_recordings = IndexSelection::All;
    assert!(matches!(config.validate(), Err(Error::Config(_))));
}

#[test]
fn test_validate_rejects_parallel_jobs_without_gridsearch() {
    let mut config = base_config();
    config.sorting.num_ks_jobs = 2;
    config.sorting.do_ks_param_gridsearch = false;
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("do_KS_param_gridsearch"));

    config.sorting.do_ks_param_gridsearch = true;
    assert!(config.validate().is_ok());
}

#[test]
fn test_validate_requires_blocks_and_correction_off() {
    let mut config = base_config();
    config.ks.insert("nblocks".into(), toml::Value::Integer(1));
    assert!(config.validate().unwrap_err().to_string().contains("nblocks"));

    let mut config = base_config();
    config.ks.insert("do_correction".into(), toml::Value::Boolean(true));
    assert!(config.validate().unwrap_err().to_string().contains("do_correction"));
}

#[test]
fn test_validate_rejects_mismatched_policy_count() {
    let mut config = base_config();
    config.group.remove_bad_emg_chans = vec![BadChannelPolicy::Off, BadChannelPolicy::Off];
    assert!(matches!(config.validate(), Err(Error::Config(_))));
}

#[test]
fn test_validate_rejects_malformed_th_candidates() {
    let mut config = base_config();
    config.sorting.gridsearch_ks_params.insert(
        "Th".into(),
        vec![toml::Value::Array(vec![toml::Value::Integer(10)])],
    );
    assert!(matches!(config.validate(), Err(Error::Config(_))));
}

#[test]
fn test_unknown_keys_survive_round_trip() {
    let text = EMU_TEMPLATE.replace(
        "[SI]",
        "custom_flag = true\n\n[SI]\nn_jobs_hint = 12",
    );
    let config = EmuConfig::from_toml_str(&text).unwrap();
    assert_eq!(
        config.ks.get("custom_flag"),
        Some(&toml::Value::Boolean(true))
    );
    assert_eq!(
        config.si.extra.get("n_jobs_hint"),
        Some(&toml::Value::Integer(12))
    );

    let temp = TempDir::new().unwrap();
    let path = temp.path().join(CONFIG_FILE_NAME);
    config.save(&path).unwrap();
    let reloaded = EmuConfig::load(&path).unwrap();
    assert_eq!(reloaded, config);
    assert!(!temp.path().join("emu_config.toml.tmp").exists());
}

#[test]
fn test_data_fingerprint_ignores_other_sections() {
    let config = base_config();
    let mut changed = config.clone();
    changed.sorting.num_ks_jobs = 3;
    changed.ks.insert("nt".into(), toml::Value::Integer(31));
    assert_eq!(
        config.data_fingerprint().unwrap(),
        changed.data_fingerprint().unwrap()
    );

    changed.data.emg_passband = [300.0, 5000.0];
    assert_ne!(
        config.data_fingerprint().unwrap(),
        changed.data_fingerprint().unwrap()
    );
}

#[test]
fn test_create_config_writes_template() {
    let temp = TempDir::new().unwrap();
    let path = create_config(temp.path(), SortType::Emu).unwrap();
    assert_eq!(path, temp.path().join(CONFIG_FILE_NAME));

    let config = EmuConfig::load(&path).unwrap();
    assert_eq!(config.data.session_folder, temp.path());
    assert_eq!(config.output_folder(), temp.path());

    let ks4_path = create_config(temp.path(), SortType::Ks4).unwrap();
    assert_eq!(EmuConfig::load(&ks4_path).unwrap().sort_type, SortType::Ks4);
}

#[test]
fn test_load_missing_file_is_not_found() {
    let temp = TempDir::new().unwrap();
    let result = EmuConfig::load(&temp.path().join("missing.toml"));
    assert!(matches!(result, Err(Error::NotFound(_))));
}
