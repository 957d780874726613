#[cfg(test)]
mod tests {
    use crate::etf::tests::helpers::*;
    use crate::etf::{EtfError, Scanner, Term};

    fn build(term: Vec<u8>) -> Result<Term, EtfError> {
        let data = with_magic(term);
        let mut scanner = Scanner::new(&data)?;
        Term::build(&mut scanner)
    }

    #[test]
    fn test_scalars() {
        assert_eq!(build(small_int(7)).unwrap(), Term::Int(7));
        assert_eq!(build(int(-1)).unwrap(), Term::Int(-1));
        assert_eq!(build(float(0.5)).unwrap(), Term::Float(0.5));
        assert_eq!(build(nil()).unwrap(), Term::Nil);
        assert_eq!(
            build(atom(b"kv_node")).unwrap(),
            Term::Atom(b"kv_node".to_vec())
        );
        assert_eq!(
            build(binary(b"doc-1")).unwrap(),
            Term::Binary(b"doc-1".to_vec())
        );
        assert_eq!(
            build(string(&[10, 20])).unwrap(),
            Term::CharList(vec![10, 20])
        );
    }

    #[test]
    fn test_nested_header_shape() {
        let term = build(tuple(&[
            atom(b"db_header"),
            small_int(7),
            erl_int(42),
            nil(),
            tuple(&[erl_int(8192), nil(), erl_int(55)]),
            nil(),
        ]))
        .unwrap();

        let children = term.as_tuple().unwrap();
        assert_eq!(children.len(), 6);
        assert_eq!(children[0].as_atom(), Some(&b"db_header"[..]));
        assert_eq!(children[1].as_int(), Some(7));
        assert_eq!(children[2].as_int(), Some(42));
        let state = children[4].as_tuple().unwrap();
        assert_eq!(state[0].as_int(), Some(8192));
        assert_eq!(state[2].as_int(), Some(55));
        assert!(children[5].as_tuple().is_none());
    }

    #[test]
    fn test_list_tail_is_consumed_not_stored() {
        let term = build(list(&[small_int(1), small_int(2)])).unwrap();
        assert_eq!(term, Term::List(vec![Term::Int(1), Term::Int(2)]));
    }

    #[test]
    fn test_improper_list_is_rejected() {
        let err = build(improper_list(&[small_int(1)], small_int(2))).unwrap_err();
        assert!(matches!(err, EtfError::ImproperList(_)));
    }

    #[test]
    fn test_big_integers() {
        assert_eq!(
            build(erl_int(5_000_000_000)).unwrap(),
            Term::Int(5_000_000_000)
        );
        assert_eq!(
            build(erl_int(-5_000_000_000)).unwrap(),
            Term::Int(-5_000_000_000)
        );
    }

    #[test]
    fn test_accessors_reject_wrong_variants() {
        let term = build(binary(b"x")).unwrap();
        assert!(term.as_int().is_none());
        assert!(term.as_atom().is_none());
        assert!(term.as_tuple().is_none());
    }
}
