//! Result folder naming
//!
//! The permanent folder name is derived from a job's [`ResultManifest`]:
//! `sorted_<timestamp>[_g<group>]_<session>[_<swept params>]_SCORE_<score>[_KS4]`.

use crate::isolation;
use crate::models::ResultManifest;
use emu_common::config::SortType;
use emu_common::human_time::folder_timestamp;

/// Drop characters the viewer tooling chokes on, then trailing separators
fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '(' && *c != ')')
        .collect();
    cleaned.trim_end_matches([',', '_']).to_string()
}

pub fn final_folder_name(manifest: &ResultManifest) -> String {
    let mut name = format!("sorted_{}", folder_timestamp(manifest.created_at));
    if manifest.num_groups > 1 {
        name.push_str(&format!(
            "_g{:0width$}",
            manifest.group,
            width = isolation::pad_width(manifest.num_groups)
        ));
    }
    name.push('_');
    name.push_str(&manifest.session_name);
    if let Some(params) = &manifest.swept_params {
        name.push('_');
        name.push_str(&params.folder_suffix());
    }

    let mut name = sanitize(&name);
    match manifest.job_score {
        Some(score) => name.push_str(&format!("_SCORE_{:.3}", score)),
        None => name.push_str("_SCORE_nan"),
    }
    if manifest.sort_type == SortType::Ks4 {
        name.push_str("_KS4");
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::ParameterCombination;
    use chrono::{Local, TimeZone};
    use toml::Value;

    fn manifest() -> ResultManifest {
        ResultManifest {
            folder_name: String::new(),
            session_name: "session A".to_string(),
            sort_type: SortType::Emu,
            group: 0,
            num_groups: 1,
            worker: 0,
            num_units: 3,
            channels: vec!["CH1".into()],
            swept_params: None,
            job_score: Some(0.81234),
            created_at: Local
                .with_ymd_and_hms(2024, 3, 5, 14, 7, 9)
                .unwrap(),
        }
    }

    #[test]
    fn test_single_group_without_sweep() {
        assert_eq!(
            final_folder_name(&manifest()),
            "sorted_20240305_140709000000_sessionA_SCORE_0.812"
        );
    }

    #[test]
    fn test_group_sweep_and_ks4_suffix() {
        let mut m = manifest();
        m.session_name = "rat(1)".to_string();
        m.num_groups = 12;
        m.group = 3;
        m.sort_type = SortType::Ks4;
        m.job_score = None;
        m.swept_params = Some(ParameterCombination::from_iter([
            (
                "Th".to_string(),
                Value::Array(vec![Value::Integer(10), Value::Integer(4)]),
            ),
            ("spkTh".to_string(), Value::Array(vec![Value::Integer(-6)])),
        ]));
        assert_eq!(
            final_folder_name(&m),
            "sorted_20240305_140709000000_g03_rat1_Th_10,4_spkTh_-6_SCORE_nan_KS4"
        );
    }

    #[test]
    fn test_trailing_separators_stripped() {
        assert_eq!(sanitize("sorted_x_Th_1,"), "sorted_x_Th_1");
        assert_eq!(sanitize("sorted_ x (1)_,_"), "sorted_x1");
    }
}
