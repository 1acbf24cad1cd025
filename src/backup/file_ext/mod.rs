use itertools::Itertools;

pub trait FileExtProvider {
    fn file_ext(&self) -> Option<&'static str>;
}

/// Joins the extensions of every pipeline layer, outermost first, e.g. `gz.gpg`.
pub fn joined_file_ext(layers: &[&dyn FileExtProvider]) -> String {
    layers.iter().filter_map(|l| l.file_ext()).join(".")
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Ext(Option<&'static str>);

    impl FileExtProvider for Ext {
        fn file_ext(&self) -> Option<&'static str> {
            self.0
        }
    }

    #[test]
    fn test_joined_file_ext_skips_missing_layers() {
        assert_eq!(joined_file_ext(&[&Ext(Some("gz")), &Ext(Some("gpg"))]), "gz.gpg");
        assert_eq!(joined_file_ext(&[&Ext(None), &Ext(Some("age"))]), "age");
        assert_eq!(joined_file_ext(&[&Ext(None), &Ext(None)]), "");
    }
}
