//! End-to-end tests over real dataset files: write/read round-trips, the
//! copy-with-replacement path used by the quality-control passes, and a
//! full thermistor-depth conversion from synthetic logger exports.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use ndarray::{Array1, Array2};
use tempfile::TempDir;

use mooring_processor::app::models::FrameVariable;
use mooring_processor::app::services::converters::td::{self, TdInputs};
use mooring_processor::app::services::dataset_writer::{
    AttrValue, DatasetSnapshot, SnapshotGroup, SnapshotVariable, read_snapshot, rewrite_with,
    write_snapshot,
};
use mooring_processor::app::services::segment_reducer::ExecutionContext;
use mooring_processor::app::services::ssl_detector::{self, SslTuning};
use mooring_processor::app::services::valid_window;
use mooring_processor::config::{OutputOptions, StationInfo, TdSettings, TimeOptions, VelocityFilter};
use mooring_processor::constants::AVERAGE_GROUP;

fn output_options() -> OutputOptions {
    OutputOptions {
        zlib: false,
        complevel: 1,
        author: "Survey Team".to_owned(),
        email: "survey@example.com".to_owned(),
    }
}

fn averaged_dataset(dir: &TempDir, depth: &[f64]) -> PathBuf {
    let n = depth.len();
    let mut snapshot = DatasetSnapshot {
        attrs: vec![
            ("RDIBin1Mid".to_owned(), AttrValue::Number(0.5)),
            ("RDIBinSize".to_owned(), AttrValue::Number(1.0)),
        ],
        ..DatasetSnapshot::default()
    };

    let mut average = SnapshotGroup::new(AVERAGE_GROUP);
    average.dims.push(("time".to_owned(), n));
    average.dims.push(("height".to_owned(), 6));
    average.vars.push(SnapshotVariable::series(
        "time",
        "time",
        (0..n).map(|i| i as f64 * 600_000.0).collect(),
        vec![(
            "units".to_owned(),
            AttrValue::Text("milliseconds since 2018-07-01 00:00:00".to_owned()),
        )],
    ));
    average.vars.push(SnapshotVariable::series(
        "dep",
        "time",
        depth.to_vec(),
        vec![("units".to_owned(), AttrValue::Text("m".to_owned()))],
    ));
    let mut u = Array2::zeros((n, 6));
    // One beam-tracking fault in the middle of the record.
    if n > 3 {
        u[[2, 4]] = 9.0;
        u[[2, 5]] = 9.0;
    }
    average.vars.push(SnapshotVariable::profile(
        "u",
        ["time", "height"],
        [n, 6],
        u.iter().copied().collect(),
        vec![("units".to_owned(), AttrValue::Text("m/s".to_owned()))],
    ));
    average.vars.push(SnapshotVariable::profile(
        "cor_ave",
        ["time", "height"],
        [n, 6],
        vec![120.0; n * 6],
        vec![("units".to_owned(), AttrValue::Text("counts".to_owned()))],
    ));
    snapshot.groups.push(average);

    let path = dir.path().join("averaged.nc");
    write_snapshot(&path, &snapshot, &output_options()).unwrap();
    path
}

#[test]
fn snapshot_round_trips_names_shapes_values_and_attrs() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("roundtrip.nc");

    let mut snapshot = DatasetSnapshot {
        attrs: vec![
            ("Author".to_owned(), AttrValue::Text("Survey Team".to_owned())),
            ("RDIBin1Mid".to_owned(), AttrValue::Number(0.5)),
        ],
        dims: vec![("time".to_owned(), 4), ("height".to_owned(), 3)],
        ..DatasetSnapshot::default()
    };
    snapshot.vars.push(SnapshotVariable::series(
        "dep",
        "time",
        vec![1.0, 2.0, f64::NAN, 4.0],
        vec![("units".to_owned(), AttrValue::Text("m".to_owned()))],
    ));
    snapshot.vars.push(SnapshotVariable::profile(
        "u",
        ["time", "height"],
        [4, 3],
        (0..12).map(f64::from).collect(),
        vec![("units".to_owned(), AttrValue::Text("m/s".to_owned()))],
    ));

    let mut meta = SnapshotGroup::new("Meta Group");
    meta.attrs
        .push(("model".to_owned(), AttrValue::Text("TDR-2050".to_owned())));
    let mut nested = SnapshotGroup::new("Depth Meta Group");
    nested
        .attrs
        .push(("units".to_owned(), AttrValue::Text("m".to_owned())));
    meta.groups.push(nested);
    snapshot.groups.push(meta);

    write_snapshot(&path, &snapshot, &output_options()).unwrap();
    let reread = read_snapshot(&path).unwrap();

    assert_eq!(reread.attr_number("RDIBin1Mid"), Some(0.5));
    let dep = reread.variable("dep").unwrap();
    assert_eq!(dep.dims, vec!["time".to_owned()]);
    assert_eq!(dep.data[1], 2.0);
    assert!(dep.data[2].is_nan());

    let u = reread.variable("u").unwrap();
    assert_eq!(u.shape, vec![4, 3]);
    assert_eq!(u.data[7], 7.0);

    let meta = reread.group("Meta Group").unwrap();
    assert!(
        meta.attrs
            .iter()
            .any(|(k, v)| k == "model" && *v == AttrValue::Text("TDR-2050".to_owned()))
    );
    assert_eq!(meta.groups[0].name, "Depth Meta Group");
}

#[test]
fn rewrite_with_resizes_the_replaced_time_axis() {
    let dir = TempDir::new().unwrap();
    let depth: Vec<f64> = vec![4.0; 10];
    let src = averaged_dataset(&dir, &depth);
    let dst = dir.path().join("trimmed.nc");

    let mut replacements: BTreeMap<String, FrameVariable> = BTreeMap::new();
    replacements.insert(
        "time".to_owned(),
        FrameVariable::Series(Array1::from(vec![0.0, 600_000.0, 1_200_000.0])),
    );
    replacements.insert(
        "dep".to_owned(),
        FrameVariable::Series(Array1::from(vec![4.0, 4.0, 4.0])),
    );
    replacements.insert(
        "u".to_owned(),
        FrameVariable::Profile(Array2::zeros((3, 6))),
    );
    replacements.insert(
        "cor_ave".to_owned(),
        FrameVariable::Profile(Array2::from_elem((3, 6), 120.0)),
    );
    rewrite_with(&src, &dst, AVERAGE_GROUP, &replacements, &output_options()).unwrap();

    let reread = read_snapshot(&dst).unwrap();
    let group = reread.group(AVERAGE_GROUP).unwrap();
    assert_eq!(
        group.dims.iter().find(|(n, _)| n == "time").unwrap().1,
        3
    );
    assert_eq!(group.variable("dep").unwrap().data.len(), 3);
    // Root attributes survive the copy.
    assert_eq!(reread.attr_number("RDIBinSize"), Some(1.0));
}

#[test]
fn valid_window_extraction_trims_and_is_idempotent() {
    let dir = TempDir::new().unwrap();
    // Deployment transient, stable plateau, recovery transient.
    let mut depth = vec![0.05, 6.0];
    depth.extend(std::iter::repeat_n(12.3, 10));
    depth.extend([6.0, 0.05]);
    let src = averaged_dataset(&dir, &depth);

    let once = dir.path().join("once.nc");
    let (start, end) = valid_window::extract_valid_window(
        &src,
        &once,
        AVERAGE_GROUP,
        0.2,
        &output_options(),
    )
    .unwrap();
    assert_eq!(start, 2);
    assert_eq!(end, 11);

    let twice = dir.path().join("twice.nc");
    let (start2, end2) = valid_window::extract_valid_window(
        &once,
        &twice,
        AVERAGE_GROUP,
        0.2,
        &output_options(),
    )
    .unwrap();
    assert_eq!((start2, end2), (0, end - start));

    let reread = read_snapshot(&twice).unwrap();
    let group = reread.group(AVERAGE_GROUP).unwrap();
    assert_eq!(group.variable("dep").unwrap().data.len(), end - start + 1);
    assert_eq!(group.variable("u").unwrap().shape, vec![end - start + 1, 6]);
}

#[test]
fn missing_average_group_is_reported() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("no_average.nc");
    let snapshot = DatasetSnapshot {
        dims: vec![("time".to_owned(), 2)],
        ..DatasetSnapshot::default()
    };
    write_snapshot(&path, &snapshot, &output_options()).unwrap();

    let err = valid_window::extract_valid_window(
        &path,
        &dir.path().join("out.nc"),
        AVERAGE_GROUP,
        0.2,
        &output_options(),
    )
    .unwrap_err();
    assert!(err.to_string().contains("No average-data group"));
}

#[test]
fn surface_line_pass_masks_bins_above_the_cutoff() {
    let dir = TempDir::new().unwrap();
    let depth = vec![4.0; 20];
    let src = averaged_dataset(&dir, &depth);
    let dst = dir.path().join("masked.nc");

    let filter = VelocityFilter {
        u: 0.5,
        v: 0.5,
        w: 0.5,
        scatter: 0,
    };
    ssl_detector::detect_surface_line(
        &src,
        &dst,
        0.2,
        &filter,
        false,
        false,
        &SslTuning::default(),
        &output_options(),
    )
    .unwrap();

    let reread = read_snapshot(&dst).unwrap();
    let group = reread.group(AVERAGE_GROUP).unwrap();
    let u = group.variable("u").unwrap();
    // Geometry: floor((4.0 - 0.5) / 1.0) - 1 = 2 -> bins 2.. masked.
    let ncols = u.shape[1];
    for row in 0..u.shape[0] {
        assert!(u.data[row * ncols + 2].is_nan());
        assert!(u.data[row * ncols + 5].is_nan());
    }
    // Bins below the cutoff survive outside the faulted row.
    assert!(!u.data[ncols].is_nan());
    // The beam-tracking fault row keeps nothing downstream of the jump; the
    // jump between bins 3 and 4 on row 2 already sits above the cutoff.
    assert!(u.data[2 * ncols + 4].is_nan());
}

#[test]
fn thermistor_conversion_produces_raw_and_averaged_views() {
    let dir = TempDir::new().unwrap();
    let prefix = dir.path().join("sta1_td").to_string_lossy().into_owned();

    // 120 samples at 5 s spacing: 24 plateau samples at 0.05 m, then 12.3 m.
    let mut data = String::from("Time,Depth,Temperature\n");
    for i in 0..120 {
        let minute = (i * 5) / 60;
        let second = (i * 5) % 60;
        let depth = if i < 24 { 0.05 } else { 12.3 };
        data.push_str(&format!(
            "2018-07-01 00:{minute:02}:{second:02}.000,{depth},18.5\n"
        ));
    }
    fs::write(format!("{prefix}_data.txt"), data).unwrap();
    fs::write(
        format!("{prefix}_metadata.txt"),
        r#"{"instrument": {"model": "TDR-2050", "offsetfromutc": 0.0}}"#,
    )
    .unwrap();

    let inputs = TdInputs {
        export_prefix: prefix,
        save_path: dir.path().join("sta1_td.nc"),
    };
    let station = StationInfo {
        lon: 121.5,
        lat: 31.2,
        observe_instrument: vec!["TD-RBR".to_owned()],
    };
    let settings = TdSettings {
        valid_dep_dif: [("S1".to_owned(), 0.2)].into_iter().collect(),
        correct0drift: true,
        time_offset: None,
    };
    let time = TimeOptions {
        window_minutes: 1.0,
        units: "milliseconds since 2018-07-01 00:00:00".to_owned(),
        calendar: "standard".to_owned(),
    };
    let ctx = ExecutionContext::with_workers(2).unwrap();

    td::convert_station(
        &ctx,
        &inputs,
        &station,
        &settings,
        0.2,
        &time,
        &output_options(),
    )
    .unwrap();

    let reread = read_snapshot(&inputs.save_path).unwrap();
    assert_eq!(reread.variable("dep").unwrap().data.len(), 120);
    assert_eq!(reread.variable("lon").unwrap().data[0] as f32, 121.5);

    let average = reread.group(AVERAGE_GROUP).unwrap();
    let dep_ave = &average.variable("dep").unwrap().data;
    // 120 samples in 12-sample blocks -> 10 averaged records.
    assert_eq!(dep_ave.len(), 10);
    // Drift correction removes the 0.05 m plateau bias.
    assert!(dep_ave[0].abs() < 1e-9);
    assert!((dep_ave[5] - 12.25).abs() < 1e-9);

    // The metadata tree is preserved with the offset rewritten to the
    // normalized timezone.
    let meta = reread.group("Meta Group").unwrap();
    let instrument = &meta.groups[0];
    assert_eq!(instrument.attr_number("offsetfromutc"), Some(8.0));
}
