mod parser;
mod types;

pub use parser::{parse_definition, parse_definition_str};
pub use types::{
    ConnectorDefinition, ModelDefinition, PropertyDefinition, PropertyType, REVISION_PROPERTY,
};

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    const DEFINITION: &str = r#"
datasource:
  host: couch.internal
  db: inventory
  views:
    - { ddoc: reports, name: by_total }

models:
  Widget:
    properties:
      color: { type: string, index: true }
      made: { type: date, index: true }
      weight: { type: number }
  Gadget:
    properties:
      label: { type: string }
      extra: { type: geo_point }
"#;

    #[test]
    fn test_parse_definition() {
        let def = parse_definition_str(DEFINITION).unwrap();
        assert_eq!(def.models.len(), 2);
        assert_eq!(def.datasource.views.len(), 1);

        let widget = &def.models["Widget"];
        assert!(widget.is_indexed("color"));
        assert!(!widget.is_indexed("weight"));
        assert_eq!(widget.kind_of("made"), Some(&PropertyType::Date));
    }

    #[test]
    fn test_custom_property_type() {
        let def = parse_definition_str(DEFINITION).unwrap();
        assert_eq!(
            def.models["Gadget"].kind_of("extra"),
            Some(&PropertyType::Custom("geo_point".into()))
        );
    }

    #[test]
    fn test_model_definitions_are_named_and_sorted() {
        let def = parse_definition_str(DEFINITION).unwrap();
        let names: Vec<String> = def.model_definitions().into_iter().map(|m| m.name).collect();
        assert_eq!(names, vec!["Gadget".to_string(), "Widget".to_string()]);
    }

    #[test]
    fn test_indexed_properties() {
        let model = ModelDefinition::new("Widget")
            .property("color", PropertyType::String, true)
            .property("made", PropertyType::Date, true)
            .property("size", PropertyType::Number, false);

        let indexed: Vec<&str> = model.indexed_properties().collect();
        assert_eq!(indexed, vec!["color", "made"]);
        assert_eq!(model.kind_of("made"), Some(&PropertyType::Date));
    }

    #[test]
    fn test_with_revision_appends_rev_property() {
        let model = ModelDefinition::new("Widget").with_revision();
        assert_eq!(model.kind_of(REVISION_PROPERTY), Some(&PropertyType::String));
        assert!(!model.is_indexed(REVISION_PROPERTY));
    }

    #[test]
    fn test_parse_definition_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(DEFINITION.as_bytes()).unwrap();
        let def = parse_definition(file.path()).unwrap();
        assert_eq!(def.datasource.database.as_deref(), None);
        assert_eq!(def.datasource.db.as_deref(), Some("inventory"));
    }

    #[test]
    fn test_parse_invalid_yaml() {
        let result = parse_definition_str("datasource: [not, a, mapping]");
        assert!(result.is_err());
    }
}
