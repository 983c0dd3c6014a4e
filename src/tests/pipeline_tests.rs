#[cfg(test)]
mod pipeline_tests {
    use crate::config::PipelineConfig;
    use crate::data_models::{FileFormat, Unit};
    use crate::errors::PipelineError;
    use crate::features::FeatureRequest;
    use crate::identity::InMemoryIdentityResolver;
    use crate::interval::Interval;
    use crate::pipeline::{Pipeline, Stage};
    use crate::store::ProfileStore;
    use crate::tests::test_helpers::{fixture, hour_of_samples, hourly, meta, record, write_raw_csv};

    const TIMES: [&str; 3] = [
        "2012-01-02 10:00:00",
        "2012-01-07 10:00:00",
        "2012-06-04 10:00:00",
    ];

    fn save_year(config: &PipelineConfig) {
        let store = ProfileStore::new(config);
        let current = TIMES.iter().map(|t| record("R", 100, t, 5.0, 1)).collect();
        let voltage = TIMES.iter().map(|t| record("R", 101, t, 230.0, 1)).collect();
        store.save(&hourly(2012, Unit::A, current), FileFormat::Parquet).unwrap();
        store.save(&hourly(2012, Unit::V, voltage), FileFormat::Parquet).unwrap();
    }

    fn resolver() -> InMemoryIdentityResolver {
        InMemoryIdentityResolver::new(vec![
            meta(100, "R", Unit::A, 2012, 9001),
            meta(101, "R", Unit::V, 2012, 0),
        ])
    }

    #[test]
    fn test_stage_names_parse_back() {
        for stage in [
            Stage::ProfilePower,
            Stage::AggregateProfilePower(Interval::Month),
            Stage::IntervalDemand(Interval::Year),
            Stage::IntervalDemand(Interval::Day),
            Stage::DaytypeDemand,
            Stage::SeasonalDaytypeDemand,
        ] {
            assert_eq!(Stage::parse(&stage.name()).unwrap(), stage);
        }
        assert_eq!(Stage::AggregateProfilePower(Interval::Month).name(), "aggpp_M");
        assert_eq!(Stage::IntervalDemand(Interval::Year).name(), "aAd");
        assert!(Stage::parse("bogus").is_err());
        assert!(Stage::parse("aggpp_").is_err());
    }

    #[test]
    fn test_aggregation_and_season_end_to_end() {
        let (_dir, config) = fixture();
        save_year(&config);
        let resolver = resolver();
        let pipeline = Pipeline::new(&config, &resolver);

        let written = pipeline.generate_agg_profiles(2012, Interval::Month).unwrap();
        assert_eq!(written.len(), 4);
        for stage in ["pp", "aggpp_M", "aMd", "adtd"] {
            assert!(pipeline.stage_path(stage, 2012, FileFormat::Parquet).exists());
            assert!(pipeline.stage_path(stage, 2012, FileFormat::Csv).exists());
        }
        assert!(written[0].ends_with("aggProfiles/pp/parquet/pp_2012.parquet"));

        assert_eq!(pipeline.read_agg_profiles(2012, "pp").unwrap().height(), 3);
        // January to June, including empty months.
        assert_eq!(pipeline.read_agg_profiles(2012, "aggpp_M").unwrap().height(), 6);
        assert_eq!(pipeline.read_agg_profiles(2012, "aMd").unwrap().height(), 1);
        assert_eq!(pipeline.read_agg_profiles(2012, "adtd").unwrap().height(), 3);

        let season = pipeline.generate_season_adtd(2012).unwrap();
        assert!(season.exists());
        let df = pipeline.read_agg_profiles(2012, "adtd_season").unwrap();
        assert_eq!(df.height(), 3);
        let answers = crate::io::i64_column(&df, "AnswerID").unwrap();
        assert!(answers.iter().all(|a| *a == Some(9001)));
    }

    #[test]
    fn test_unit_profiles_in_both_shapes() {
        let (_dir, config) = fixture();
        save_year(&config);
        let resolver = resolver();
        let pipeline = Pipeline::new(&config, &resolver);

        let bins = pipeline
            .aggregate_unit_profiles(2012, Unit::A, Interval::Month, false)
            .unwrap();
        // January to June for the one current profile.
        assert_eq!(bins.height(), 6);
        for column in ["ProfileID", "Datefield", "Mean_M_A", "ValidHours", "TotalHours", "AnswerID"] {
            assert!(crate::io::has_column(&bins, column), "missing {column}");
        }
        let totals = crate::io::f64_column(&bins, "TotalHours").unwrap();
        assert_eq!(totals[0], Some(2.0));
        assert_eq!(totals[1], Some(0.0));

        let means = pipeline
            .aggregate_unit_profiles(2012, Unit::A, Interval::Year, true)
            .unwrap();
        assert_eq!(means.height(), 1);
        assert_eq!(crate::io::f64_column(&means, "AnnualMean_A_A").unwrap()[0], Some(5.0));
        assert_eq!(crate::io::f64_column(&means, "ValidHoursOfTotal").unwrap()[0], Some(1.0));
        assert_eq!(crate::io::i64_column(&means, "AnswerID").unwrap()[0], Some(9001));

        assert!(matches!(
            pipeline.aggregate_unit_profiles(2012, Unit::A, Interval::HOURLY, true),
            Err(PipelineError::InvalidInput(_))
        ));
        assert!(matches!(
            pipeline.aggregate_unit_profiles(2012, Unit::Hz, Interval::Month, true),
            Err(PipelineError::MissingData { .. })
        ));
    }

    #[test]
    fn test_aggregation_requires_calendar_interval() {
        let (_dir, config) = fixture();
        save_year(&config);
        let resolver = resolver();
        let err = Pipeline::new(&config, &resolver)
            .generate_agg_profiles(2012, Interval::HOURLY)
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput(_)));
    }

    #[test]
    fn test_missing_year_does_not_stop_range() {
        let (_dir, config) = fixture();
        save_year(&config);
        let resolver = resolver();
        let pipeline = Pipeline::new(&config, &resolver);

        let report = pipeline
            .generate_agg_profiles_range(2011, 2012, Interval::Month)
            .unwrap();
        assert_eq!(report.completed, vec![2012]);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].0, 2011);
        assert!(!report.is_complete());

        let seasons = pipeline.generate_season_range(2011, 2013).unwrap();
        assert_eq!(seasons.completed, vec![2012]);
        assert_eq!(seasons.skipped.len(), 2);
    }

    #[test]
    fn test_corrupt_metered_table_fails_the_year() {
        let (_dir, config) = fixture();
        save_year(&config);
        let store = ProfileStore::new(&config);
        let kw_path = store.table_path(2012, Unit::KW, Interval::HOURLY, FileFormat::Parquet);
        std::fs::create_dir_all(kw_path.parent().unwrap()).unwrap();
        std::fs::write(&kw_path, b"not a parquet file").unwrap();
        let resolver = InMemoryIdentityResolver::new(vec![
            meta(97, "R", Unit::KW, 2012, 0),
            meta(98, "R", Unit::KVA, 2012, 0),
            meta(100, "R", Unit::A, 2012, 9001),
            meta(101, "R", Unit::V, 2012, 0),
        ]);
        let pipeline = Pipeline::new(&config, &resolver);

        let report = pipeline
            .generate_agg_profiles_range(2012, 2012, Interval::Month)
            .unwrap();
        assert!(report.completed.is_empty());
        assert!(report.skipped.is_empty());
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, 2012);
        assert!(!pipeline.stage_path("pp", 2012, FileFormat::Parquet).exists());
    }

    #[test]
    fn test_reduce_years_skips_years_without_raw_data() {
        let (_dir, config) = fixture();
        for year in [2011, 2013] {
            let start = format!("{year}-03-01 00:00:00");
            write_raw_csv(&config, Unit::A, year, 3, &hour_of_samples("R1", "100", &start, "4", "Y"));
        }
        let resolver = InMemoryIdentityResolver::default();
        let pipeline = Pipeline::new(&config, &resolver);

        let (report, reductions) = pipeline
            .reduce_years(Interval::HOURLY, 2011, 2013, FileFormat::Csv)
            .unwrap();
        assert_eq!(report.completed, vec![2011, 2013]);
        assert_eq!(report.skipped.iter().map(|(y, _)| *y).collect::<Vec<_>>(), vec![2012]);
        assert!(report.failed.is_empty());
        assert_eq!(reductions.len(), 3);
        assert!(ProfileStore::new(&config)
            .table_path(2013, Unit::A, Interval::HOURLY, FileFormat::Csv)
            .exists());
    }

    #[test]
    fn test_read_agg_profiles_errors() {
        let (_dir, config) = fixture();
        let resolver = resolver();
        let pipeline = Pipeline::new(&config, &resolver);
        assert!(matches!(
            pipeline.read_agg_profiles(2012, "adtd"),
            Err(PipelineError::MissingData { .. })
        ));
        assert!(matches!(
            pipeline.read_agg_profiles(2012, "not_a_stage"),
            Err(PipelineError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_every_entry_point_rejects_years_outside_survey() {
        let (_dir, config) = fixture();
        let resolver = resolver();
        let pipeline = Pipeline::new(&config, &resolver);
        let is_input = |r: Result<(), PipelineError>| matches!(r, Err(PipelineError::InvalidInput(_)));

        for year in [1990, 2020] {
            assert!(is_input(pipeline
                .reduce_years(Interval::HOURLY, year, 2012.max(year), FileFormat::Parquet)
                .map(|_| ())));
            assert!(is_input(pipeline.generate_agg_profiles(year, Interval::Month).map(|_| ())));
            assert!(is_input(pipeline.generate_agg_profiles_range(year, year, Interval::Month).map(|_| ())));
            assert!(is_input(pipeline.generate_season_adtd(year).map(|_| ())));
            assert!(is_input(pipeline.generate_season_range(year, year).map(|_| ())));
            assert!(is_input(pipeline.read_agg_profiles(year, "adtd").map(|_| ())));
            assert!(is_input(pipeline
                .aggregate_unit_profiles(year, Unit::A, Interval::Month, true)
                .map(|_| ())));
            assert!(is_input(pipeline.build_features(&FeatureRequest::new(year, year)).map(|_| ())));
        }
        assert!(is_input(pipeline.generate_season_range(2013, 2012).map(|_| ())));
    }
}
