#[cfg(test)]
mod aggregate_tests {
    use approx::assert_relative_eq;

    use crate::aggregate::{
        aggregate_by_daytype, aggregate_by_interval, aggregate_by_season, aggregate_to_dataframe,
        aggregate_unit, daytype_of, interval_demand, mean_std, unit_aggregate_to_dataframe,
        unit_interval_means, unit_means_to_dataframe, DaytypeDemand, DaytypeRow,
    };
    use crate::data_models::{Daytype, PowerRecord, PowerTable, ReducedRecord, Schema, Season, Unit};
    use crate::interval::Interval;
    use crate::io;
    use crate::tests::test_helpers::{hourly, meta, record, ts};

    fn power(at: &str, i: f64, valid: u8, kw_calculated: f64) -> PowerRecord {
        PowerRecord {
            recorder_id: "R".to_string(),
            profile_id_i: 100,
            profile_id_v: 101,
            answer_id: 42,
            datefield: ts(at),
            unitsread_i: i,
            valid_i: valid,
            unitsread_v: 230.0,
            valid_v: 1,
            unitsread_kw: None,
            valid_kw: None,
            unitsread_kva: None,
            valid_kva: None,
            kw_calculated,
            valid_calculated: valid,
        }
    }

    fn table(schema: Schema, records: Vec<PowerRecord>) -> PowerTable {
        PowerTable {
            year: 2012,
            schema,
            records,
        }
    }

    #[test]
    fn test_monthly_bins_fill_gaps_and_mask_invalid() {
        let calculated = table(
            Schema::Calculated,
            vec![
                power("2012-01-01 00:00:00", 5.0, 1, 1.15),
                power("2012-01-01 01:00:00", 4.0, 0, 0.92),
                power("2012-03-10 00:00:00", 2.0, 1, 0.4),
            ],
        );
        let agg = aggregate_by_interval(&calculated, Interval::Month);
        assert_eq!(agg.rows.len(), 3);

        let jan = &agg.rows[0];
        assert_eq!(jan.datefield, ts("2012-01-31 00:00:00"));
        assert_eq!(jan.answer_id, 42);
        assert_eq!(jan.unitsread_i, Some(5.0));
        assert_eq!(jan.unitsread_v, Some(230.0));
        assert_relative_eq!(jan.kw_calculated, 1.15);
        assert_relative_eq!(jan.valid_calculated, 1.0);
        assert_relative_eq!(jan.interval_hours, 744.0);
        assert_relative_eq!(jan.valid_obs_ratio, 1.0 / 744.0);
        assert!(jan.unitsread_kw.is_none());

        let feb = &agg.rows[1];
        assert_eq!(feb.datefield, ts("2012-02-29 00:00:00"));
        assert_relative_eq!(feb.interval_hours, 696.0);
        assert!(feb.unitsread_i.is_none());
        assert_relative_eq!(feb.kw_calculated, 0.0);
        assert_relative_eq!(feb.valid_obs_ratio, 0.0);

        let demand = interval_demand(&agg);
        assert_eq!(demand.rows.len(), 1);
        let row = &demand.rows[0];
        assert_relative_eq!(row.kw_mean.unwrap(), (1.15 + 0.4) / 3.0, epsilon = 1e-12);
        assert!(row.kw_std.is_some());
        assert!(row.kva_mean.is_none());
        assert_relative_eq!(row.valid_hours, 2.0);
        assert_relative_eq!(row.interval_hours_sum, 744.0 + 696.0 + 744.0);
    }

    #[test]
    fn test_metered_bins_sum_kw_and_average_kva() {
        let mut first = power("2012-05-01 00:00:00", 5.0, 1, 1.15);
        first.unitsread_kw = Some(1.0);
        first.valid_kw = Some(1);
        first.unitsread_kva = Some(1.5);
        first.valid_kva = Some(1);
        let mut second = power("2012-05-01 01:00:00", 5.0, 1, 1.15);
        second.unitsread_kw = Some(2.0);
        second.valid_kw = Some(0);
        second.unitsread_kva = Some(2.5);
        second.valid_kva = Some(1);
        let mut masked = power("2012-06-01 00:00:00", 5.0, 1, 1.15);
        masked.unitsread_kw = Some(9.0);
        masked.valid_kw = Some(0);

        let agg = aggregate_by_interval(&table(Schema::Metered, vec![first, second, masked]), Interval::Month);
        assert_eq!(agg.rows.len(), 2);
        assert_eq!(agg.rows[0].unitsread_kw, Some(1.0));
        assert_eq!(agg.rows[0].unitsread_kva, Some(2.0));
        assert_eq!(agg.rows[1].unitsread_kw, Some(0.0));
        assert_eq!(agg.rows[1].unitsread_kva, None);

        let df = aggregate_to_dataframe(&agg).unwrap();
        let schema = io::str_column(&df, "schema").unwrap();
        assert_eq!(schema[0].as_deref(), Some("metered"));
    }

    #[test]
    fn test_daytype_classification() {
        assert_eq!(daytype_of(ts("2012-01-02 12:00:00")), Some(Daytype::Weekday));
        assert_eq!(daytype_of(ts("2012-01-06 12:00:00")), Some(Daytype::Weekday));
        assert_eq!(daytype_of(ts("2012-01-07 12:00:00")), Some(Daytype::Saturday));
        assert_eq!(daytype_of(ts("2012-01-08 12:00:00")), Some(Daytype::Sunday));
        // Day boundaries.
        assert_eq!(daytype_of(ts("2012-01-06 23:59:59")), Some(Daytype::Weekday));
        assert_eq!(daytype_of(ts("2012-01-07 00:00:00")), Some(Daytype::Saturday));
        assert_eq!(daytype_of(ts("2012-01-07 23:59:59")), Some(Daytype::Saturday));
        assert_eq!(daytype_of(ts("2012-01-08 00:00:00")), Some(Daytype::Sunday));
        assert_eq!(daytype_of(ts("2012-01-08 23:59:59")), Some(Daytype::Sunday));
        assert_eq!(daytype_of(ts("2012-01-09 00:00:00")), Some(Daytype::Weekday));
        assert_eq!(Daytype::from_weekday_index(0), Some(Daytype::Weekday));
        assert_eq!(Daytype::from_weekday_index(4), Some(Daytype::Weekday));
        assert_eq!(Daytype::from_weekday_index(5), Some(Daytype::Saturday));
        assert_eq!(Daytype::from_weekday_index(6), Some(Daytype::Sunday));
        assert_eq!(Daytype::from_weekday_index(7), None);
    }

    fn unit_records() -> Vec<ReducedRecord> {
        vec![
            record("R", 100, "2012-01-01 00:00:00", 5.0, 1),
            record("R", 100, "2012-01-01 01:00:00", 3.0, 0),
            record("R", 100, "2012-03-01 00:00:00", 2.0, 1),
            record("R", 100, "2012-03-01 01:00:00", 4.0, 1),
            // Not linked to a survey response.
            record("R", 200, "2012-01-05 00:00:00", 7.0, 0),
        ]
    }

    #[test]
    fn test_unit_bins_average_current() {
        let metadata = vec![meta(100, "R", Unit::A, 2012, 9001)];
        let agg = aggregate_unit(&hourly(2012, Unit::A, unit_records()), Interval::Month, &metadata);
        assert_eq!(agg.rows.len(), 4);

        let jan = &agg.rows[0];
        assert_eq!((jan.profile_id, jan.answer_id), (100, Some(9001)));
        assert_eq!(jan.datefield, ts("2012-01-31 00:00:00"));
        assert_eq!(jan.value, Some(5.0));
        assert_eq!((jan.valid_hours, jan.total_hours), (1.0, 2.0));

        let feb = &agg.rows[1];
        assert_eq!(feb.datefield, ts("2012-02-29 00:00:00"));
        assert_eq!(feb.value, None);
        assert_eq!((feb.valid_hours, feb.total_hours), (0.0, 0.0));

        assert_eq!(agg.rows[2].value, Some(3.0));
        assert_eq!((agg.rows[2].valid_hours, agg.rows[2].total_hours), (2.0, 2.0));

        let unlinked = &agg.rows[3];
        assert_eq!((unlinked.profile_id, unlinked.answer_id), (200, None));
        assert_eq!(unlinked.value, None);

        let df = unit_aggregate_to_dataframe(&agg).unwrap();
        assert_eq!(df.height(), 4);
        assert_eq!(io::f64_column(&df, "Mean_M_A").unwrap()[0], Some(5.0));
        assert_eq!(io::f64_column(&df, "TotalHours").unwrap()[0], Some(2.0));
        assert_eq!(io::f64_column(&df, "ValidHours").unwrap()[2], Some(2.0));
        assert_eq!(io::i64_column(&df, "AnswerID").unwrap()[3], None);
    }

    #[test]
    fn test_unit_bins_sum_energy() {
        let agg = aggregate_unit(&hourly(2012, Unit::KW, unit_records()), Interval::Month, &[]);
        let values: Vec<Option<f64>> = agg.rows.iter().map(|r| r.value).collect();
        assert_eq!(values, vec![Some(5.0), Some(0.0), Some(6.0), Some(0.0)]);
        assert!(agg.rows.iter().all(|r| r.answer_id.is_none()));
    }

    #[test]
    fn test_unit_means_weight_by_valid_hours() {
        let metadata = vec![meta(100, "R", Unit::A, 2012, 9001)];
        let current = aggregate_unit(&hourly(2012, Unit::A, unit_records()), Interval::Month, &metadata);
        let means = unit_interval_means(&current);
        assert_eq!(means.rows.len(), 2);

        let linked = &means.rows[0];
        assert_eq!(linked.answer_id, Some(9001));
        assert_relative_eq!(linked.mean.unwrap(), 11.0 / 3.0, epsilon = 1e-12);
        assert_relative_eq!(linked.valid_hours_of_total.unwrap(), 0.75, epsilon = 1e-12);

        let unlinked = &means.rows[1];
        assert_eq!(unlinked.mean, None);
        assert_eq!(unlinked.valid_hours_of_total, Some(0.0));

        let energy = unit_interval_means(&aggregate_unit(
            &hourly(2012, Unit::KW, unit_records()),
            Interval::Year,
            &metadata,
        ));
        assert_relative_eq!(energy.rows[0].mean.unwrap(), 11.0, epsilon = 1e-12);

        let df = unit_means_to_dataframe(&means).unwrap();
        let names: Vec<String> = df.get_column_names().iter().map(|n| n.to_string()).collect();
        assert_eq!(names, vec!["ProfileID", "AnnualMean_M_A", "ValidHoursOfTotal", "AnswerID"]);
    }

    #[test]
    fn test_daytype_slots_use_sample_deviation() {
        let daytype = aggregate_by_daytype(&table(
            Schema::Calculated,
            vec![
                power("2012-01-02 10:00:00", 1.0, 1, 1.0),
                power("2012-01-09 10:00:00", 1.0, 1, 3.0),
                power("2012-01-07 10:00:00", 1.0, 0, 2.0),
            ],
        ));
        assert_eq!(daytype.rows.len(), 2);

        let weekday = &daytype.rows[0];
        assert_eq!((weekday.month, weekday.daytype, weekday.hour), (1, Daytype::Weekday, 10));
        assert_eq!(weekday.kw_mean, Some(2.0));
        assert_relative_eq!(weekday.kw_std.unwrap(), 2f64.sqrt(), epsilon = 1e-12);
        assert_relative_eq!(weekday.valid_obs_ratio, 1.0);
        assert_relative_eq!(weekday.total_hours_sum, 2.0);

        let saturday = &daytype.rows[1];
        assert_eq!(saturday.daytype, Daytype::Saturday);
        assert_eq!(saturday.kw_mean, None);
        assert_relative_eq!(saturday.valid_hours, 0.0);
        assert_relative_eq!(saturday.valid_obs_ratio, 0.0);
    }

    fn daytype_row(month: u32, kw_mean: f64, kw_std: Option<f64>, valid_hours: f64) -> DaytypeRow {
        DaytypeRow {
            profile_id_i: 100,
            answer_id: 42,
            month,
            daytype: Daytype::Weekday,
            hour: 18,
            kw_mean: Some(kw_mean),
            kw_std,
            kva_mean: None,
            kva_std: None,
            valid_hours,
            total_hours_sum: 10.0,
            valid_obs_ratio: valid_hours / 10.0,
        }
    }

    #[test]
    fn test_seasons_average_monthly_statistics() {
        let daytype = DaytypeDemand {
            year: 2012,
            schema: Schema::Calculated,
            rows: vec![
                daytype_row(1, 0.5, None, 10.0),
                daytype_row(6, 1.0, Some(0.5), 10.0),
                daytype_row(7, 3.0, None, 5.0),
            ],
        };
        let seasonal = aggregate_by_season(&daytype);
        assert_eq!(seasonal.rows.len(), 2);

        let high = seasonal.rows.iter().find(|r| r.season == Season::High).unwrap();
        assert_eq!(high.kw_mean, Some(2.0));
        assert_eq!(high.kw_std, Some(0.5));
        assert_relative_eq!(high.valid_hours, 15.0);
        assert_relative_eq!(high.total_hours_sum, 20.0);
        assert_relative_eq!(high.valid_obs_ratio.unwrap(), 0.75);

        let low = seasonal.rows.iter().find(|r| r.season == Season::Low).unwrap();
        assert_eq!(low.kw_mean, Some(0.5));
        assert_eq!(low.kw_std, None);
    }

    #[test]
    fn test_mean_std_ignores_nan() {
        let (mean, std) = mean_std(&[1.0, f64::NAN, 3.0]);
        assert_eq!(mean, Some(2.0));
        assert_relative_eq!(std.unwrap(), 2f64.sqrt(), epsilon = 1e-12);
        assert_eq!(mean_std(&[f64::NAN]), (None, None));
        assert_eq!(mean_std(&[4.0]), (Some(4.0), None));
    }
}
