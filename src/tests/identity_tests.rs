#[cfg(test)]
mod identity_tests {
    use std::fs;

    use crate::config::PipelineConfig;
    use crate::data_models::Unit;
    use crate::errors::PipelineError;
    use crate::identity::{IdentityResolver, TableIdentityResolver};
    use crate::tests::test_helpers::fixture;

    fn write_tables(config: &PipelineConfig, with_geo: bool) {
        fs::create_dir_all(&config.tables_dir).unwrap();
        let tables = [
            (
                "profiles",
                "ProfileId,RecorderID,ChannelNo,Unit of measurement\n\
                 100,R1,1,2\n\
                 101,R1,2,1\n\
                 200,R2,1,2\n\
                 300,R3,1,2\n\
                 400,R4,1,2\n",
            ),
            (
                "links",
                "GroupID,AnswerID,ProfileID\n\
                 10,0,100\n\
                 10,0,101\n\
                 0,5001,100\n\
                 11,0,200\n\
                 12,0,300\n\
                 13,0,400\n\
                 13,0,0\n",
            ),
            (
                "groups",
                "GroupID,Survey,Year,LocName\n\
                 10,NRS LR,2012.0,Soweto\n\
                 11,Namibia,2012,Windhoek\n\
                 12,NRS LR,,Nowhere\n\
                 13,NRS LR,2005,Tembisa\n",
            ),
        ];
        for (name, body) in tables {
            fs::write(config.tables_dir.join(format!("{name}.csv")), body).unwrap();
        }
        if with_geo {
            fs::write(
                config.tables_dir.join("site_geo.csv"),
                "GPSName,Lat,Long,Province,Municipality,District\n\
                 Soweto,-26.2,27.9,Gauteng,Johannesburg,JHB\n",
            )
            .unwrap();
        }
    }

    #[test]
    fn test_profiles_resolve_to_group_year_and_answer() {
        let (_dir, config) = fixture();
        write_tables(&config, true);
        let resolver = TableIdentityResolver::new(&config);

        let mut meta = resolver.profile_metadata(2012).unwrap();
        meta.sort_by_key(|m| m.profile_id);
        assert_eq!(meta.len(), 2);

        let current = &meta[0];
        assert_eq!(current.profile_id, 100);
        assert_eq!(current.recorder_id, "R1");
        assert_eq!(current.unit(), Some(Unit::A));
        assert_eq!(current.answer_id, 5001);
        assert!(current.is_linked());
        assert_eq!(current.province.as_deref(), Some("Gauteng"));
        assert_eq!(current.lat, Some(-26.2));

        let voltage = &meta[1];
        assert_eq!(voltage.unit(), Some(Unit::V));
        assert_eq!(voltage.answer_id, 0);
        assert!(!voltage.is_linked());

        let older = resolver.profile_metadata(2005).unwrap();
        assert_eq!(older.len(), 1);
        assert_eq!(older[0].profile_id, 400);
        assert!(older[0].province.is_none());
        assert!(resolver.profile_metadata(2011).unwrap().is_empty());
    }

    #[test]
    fn test_geography_is_optional() {
        let (_dir, config) = fixture();
        write_tables(&config, false);
        let meta = TableIdentityResolver::new(&config).profile_metadata(2012).unwrap();
        assert_eq!(meta.len(), 2);
        assert!(meta.iter().all(|m| m.lat.is_none()));
    }

    #[test]
    fn test_missing_tables_are_missing_data() {
        let (_dir, config) = fixture();
        let err = TableIdentityResolver::new(&config)
            .profile_metadata(2012)
            .unwrap_err();
        assert!(matches!(err, PipelineError::MissingData { .. }));
    }

    #[test]
    fn test_years_outside_survey_are_rejected() {
        let (_dir, config) = fixture();
        write_tables(&config, false);
        let resolver = TableIdentityResolver::new(&config);
        for year in [1990, 2020] {
            assert!(matches!(
                resolver.profile_metadata(year),
                Err(PipelineError::InvalidInput(_))
            ));
        }
    }
}
