use winnow::ascii::{dec_int, dec_uint, hex_uint, till_line_ending};
use winnow::combinator::{
    alt, cut_err, delimited, not, opt, preceded, repeat, separated, separated_pair, terminated,
};
use winnow::error::{
    ContextError, ErrMode, FromExternalError, ModalResult, StrContext, StrContextValue,
};
use winnow::prelude::*;
use winnow::stream::Stateful;
use winnow::token::{any, one_of, take_until, take_while};

use crate::types::{CompareOp, Expr, HexToken, MetaValue, Pattern, Quantifier, StringSet};

use super::parser::{Item, Modifier, ParsedSource, RuleDef, StringDef};

/// Parser input; the state is the current nesting depth.
pub(super) type Input<'i> = Stateful<&'i str, usize>;

/// How deep parentheses, `not` and hex alternatives may nest.
pub const MAX_NESTING: usize = 64;

#[derive(Debug, thiserror::Error)]
#[error("{0} nested too deeply (at most {MAX_NESTING} levels)")]
struct NestedTooDeeply(&'static str);

const RESERVED: &[&str] = &[
    "all", "and", "any", "ascii", "at", "condition", "false", "filesize", "fullword", "global",
    "in", "include", "meta", "nocase", "none", "not", "of", "or", "private", "rule", "strings",
    "them", "true", "wide",
];

/// Run `parser` one level deeper, failing for good past [`MAX_NESTING`].
fn nested<'i, O>(
    what: &'static str,
    mut parser: impl Parser<Input<'i>, O, ErrMode<ContextError>>,
) -> impl Parser<Input<'i>, O, ErrMode<ContextError>> {
    move |input: &mut Input<'i>| {
        if input.state >= MAX_NESTING {
            return Err(ErrMode::from_external_error(input, NestedTooDeeply(what)).cut());
        }
        input.state += 1;
        let result = parser.parse_next(input);
        input.state -= 1;
        result
    }
}

// -- Whitespace & comments --------------------------------------------------

fn ws(input: &mut Input<'_>) -> ModalResult<()> {
    let _: () = repeat(
        0..,
        alt((
            take_while(1.., |c: char| c.is_ascii_whitespace()).void(),
            ("//", till_line_ending).void(),
            ("/*", cut_err(take_until(0.., "*/")), "*/").void(),
        )),
    )
    .parse_next(input)?;
    Ok(())
}

// -- Identifiers & keywords -------------------------------------------------

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn ident<'i>(input: &mut Input<'i>) -> ModalResult<&'i str> {
    (one_of(is_ident_start), take_while(0.., is_ident_char))
        .take()
        .parse_next(input)
}

/// A word that is not immediately followed by another identifier character,
/// so `rule` does not match the start of `rules`.
fn keyword<'i>(word: &'static str) -> impl Parser<Input<'i>, &'i str, ErrMode<ContextError>> {
    terminated(word, not(one_of(is_ident_char)))
}

fn string_ident<'i>(input: &mut Input<'i>) -> ModalResult<&'i str> {
    ('$', take_while(0.., is_ident_char)).take().parse_next(input)
}

// -- Literals ---------------------------------------------------------------

fn quoted_bytes(input: &mut Input<'_>) -> ModalResult<Vec<u8>> {
    '"'.parse_next(input)?;
    let mut out = Vec::new();
    loop {
        let ch = cut_err(any)
            .context(StrContext::Expected(StrContextValue::CharLiteral('"')))
            .parse_next(input)?;
        match ch {
            '"' => return Ok(out),
            '\n' => return Err(ErrMode::from_input(input).cut()),
            '\\' => {
                let esc = cut_err(any).parse_next(input)?;
                match esc {
                    '"' => out.push(b'"'),
                    '\\' => out.push(b'\\'),
                    'n' => out.push(b'\n'),
                    't' => out.push(b'\t'),
                    'r' => out.push(b'\r'),
                    'x' => {
                        let digits = cut_err(take_while(2, |c: char| c.is_ascii_hexdigit()))
                            .context(StrContext::Expected(StrContextValue::Description(
                                "two hex digits",
                            )))
                            .parse_next(input)?;
                        let byte = u8::from_str_radix(digits, 16)
                            .map_err(|_| ErrMode::from_input(input).cut())?;
                        out.push(byte);
                    }
                    _ => return Err(ErrMode::from_input(input).cut()),
                }
            }
            c => {
                let mut buf = [0u8; 4];
                out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            }
        }
    }
}

fn quoted_string(input: &mut Input<'_>) -> ModalResult<String> {
    let bytes = quoted_bytes.parse_next(input)?;
    String::from_utf8(bytes).map_err(|_| ErrMode::from_input(input).cut())
}

/// Decimal or `0x` hex, with an optional `KB`/`MB` multiplier.
fn number(input: &mut Input<'_>) -> ModalResult<i64> {
    let value: u64 = alt((
        preceded(alt(("0x", "0X")), cut_err(hex_uint::<_, u64, _>)),
        dec_uint::<_, u64, _>,
    ))
    .parse_next(input)?;
    let scale: Option<u64> =
        opt(alt(("KB".value(1024_u64), "MB".value(1024 * 1024_u64)))).parse_next(input)?;
    value
        .checked_mul(scale.unwrap_or(1))
        .and_then(|v| i64::try_from(v).ok())
        .ok_or_else(|| ErrMode::from_input(input).cut())
}

// -- Hex strings ------------------------------------------------------------

fn hex_nibble(input: &mut Input<'_>) -> ModalResult<Option<u8>> {
    alt((
        '?'.value(None),
        one_of(|c: char| c.is_ascii_hexdigit())
            .map(|c: char| c.to_digit(16).and_then(|d| u8::try_from(d).ok())),
    ))
    .parse_next(input)
}

fn hex_byte(input: &mut Input<'_>) -> ModalResult<HexToken> {
    let (hi, lo) = (hex_nibble, cut_err(hex_nibble)).parse_next(input)?;
    let mask = if hi.is_some() { 0xF0 } else { 0 } | if lo.is_some() { 0x0F } else { 0 };
    Ok(HexToken::Byte {
        value: (hi.unwrap_or(0) << 4) | lo.unwrap_or(0),
        mask,
    })
}

/// `[n]`, `[n-m]`, `[n-]` or `[-]`.
fn hex_jump(input: &mut Input<'_>) -> ModalResult<HexToken> {
    '['.parse_next(input)?;
    ws.parse_next(input)?;
    let min: Option<u32> = opt(dec_uint::<_, u32, _>).parse_next(input)?;
    ws.parse_next(input)?;
    let ranged = opt('-').parse_next(input)?.is_some();
    ws.parse_next(input)?;
    let max = if ranged {
        opt(dec_uint::<_, u32, _>).parse_next(input)?
    } else {
        Some(min.ok_or_else(|| ErrMode::from_input(input).cut())?)
    };
    ws.parse_next(input)?;
    cut_err(']').parse_next(input)?;

    let min = min.unwrap_or(0);
    if max.is_some_and(|max| max < min) {
        return Err(ErrMode::from_input(input).cut());
    }
    Ok(HexToken::Jump { min, max })
}

fn hex_alternation(input: &mut Input<'_>) -> ModalResult<HexToken> {
    let branches: Vec<Vec<HexToken>> = preceded(
        '(',
        nested(
            "hex alternatives",
            terminated(separated(1.., hex_tokens, (ws, '|')), (ws, cut_err(')'))),
        ),
    )
    .parse_next(input)?;
    Ok(HexToken::Alt(branches))
}

fn hex_token(input: &mut Input<'_>) -> ModalResult<HexToken> {
    alt((hex_byte, hex_jump, hex_alternation)).parse_next(input)
}

fn hex_tokens(input: &mut Input<'_>) -> ModalResult<Vec<HexToken>> {
    repeat(1.., preceded(ws, hex_token)).parse_next(input)
}

fn hex_string(input: &mut Input<'_>) -> ModalResult<Vec<HexToken>> {
    delimited('{', cut_err(hex_tokens), (ws, cut_err('}')))
        .context(StrContext::Label("hex string"))
        .parse_next(input)
}

// -- Regular expressions ----------------------------------------------------

/// `/body/flags`; returns the body with `\/` unescaped plus the `i` and `s` flags.
fn regex_literal(input: &mut Input<'_>) -> ModalResult<(String, bool, bool)> {
    '/'.parse_next(input)?;
    let mut body = String::new();
    loop {
        let ch = cut_err(any)
            .context(StrContext::Expected(StrContextValue::CharLiteral('/')))
            .parse_next(input)?;
        match ch {
            '/' => break,
            '\n' => return Err(ErrMode::from_input(input).cut()),
            '\\' => {
                let next = cut_err(any).parse_next(input)?;
                if next != '/' {
                    body.push('\\');
                }
                body.push(next);
            }
            c => body.push(c),
        }
    }
    if body.is_empty() {
        return Err(ErrMode::from_input(input).cut());
    }
    let flags = take_while(0.., ['i', 's']).parse_next(input)?;
    Ok((body, flags.contains('i'), flags.contains('s')))
}

// -- Strings section --------------------------------------------------------

fn modifier(input: &mut Input<'_>) -> ModalResult<Modifier> {
    alt((
        keyword("nocase").value(Modifier::Nocase),
        keyword("ascii").value(Modifier::Ascii),
        keyword("wide").value(Modifier::Wide),
        keyword("fullword").value(Modifier::Fullword),
    ))
    .parse_next(input)
}

fn string_value(input: &mut Input<'_>) -> ModalResult<(Pattern, Vec<Modifier>)> {
    alt((
        quoted_bytes.map(|bytes| (Pattern::Text(bytes), Vec::new())),
        hex_string.map(|tokens| (Pattern::Hex(tokens), Vec::new())),
        regex_literal.map(|(body, nocase, dot_all)| {
            let mut modifiers = Vec::new();
            if nocase {
                modifiers.push(Modifier::Nocase);
            }
            if dot_all {
                modifiers.push(Modifier::DotAll);
            }
            (Pattern::Regex(body), modifiers)
        }),
    ))
    .parse_next(input)
}

fn string_def(input: &mut Input<'_>) -> ModalResult<StringDef> {
    ws.parse_next(input)?;
    let at = input.len();
    let name = string_ident.parse_next(input)?;
    ws.parse_next(input)?;
    cut_err('=')
        .context(StrContext::Expected(StrContextValue::CharLiteral('=')))
        .parse_next(input)?;
    ws.parse_next(input)?;
    let (pattern, mut modifiers) = cut_err(string_value)
        .context(StrContext::Expected(StrContextValue::Description(
            "text, hex or regex string",
        )))
        .parse_next(input)?;
    let declared: Vec<Modifier> = repeat(0.., preceded(ws, modifier)).parse_next(input)?;
    modifiers.extend(declared);
    Ok(StringDef {
        name: name.to_owned(),
        pattern,
        modifiers,
        line: at,
    })
}

// -- Meta section -----------------------------------------------------------

fn meta_entry(input: &mut Input<'_>) -> ModalResult<(String, MetaValue)> {
    ws.parse_next(input)?;
    let key = ident.parse_next(input)?;
    (ws, '=', ws).parse_next(input)?;
    let value = cut_err(alt((
        quoted_string.map(MetaValue::Text),
        keyword("true").value(MetaValue::Boolean(true)),
        keyword("false").value(MetaValue::Boolean(false)),
        dec_int::<_, i64, _>.map(MetaValue::Integer),
    )))
    .context(StrContext::Expected(StrContextValue::Description(
        "metadata value",
    )))
    .parse_next(input)?;
    Ok((key.to_owned(), value))
}

// -- Conditions (precedence: or < and < not < comparison < primary) ---------

fn compare_op(input: &mut Input<'_>) -> ModalResult<CompareOp> {
    alt((
        ">=".value(CompareOp::Gte),
        ">".value(CompareOp::Gt),
        "<=".value(CompareOp::Lte),
        "<".value(CompareOp::Lt),
        "==".value(CompareOp::Eq),
        "!=".value(CompareOp::Neq),
    ))
    .parse_next(input)
}

fn string_set(input: &mut Input<'_>) -> ModalResult<StringSet> {
    alt((
        keyword("them").value(StringSet::Them),
        delimited(
            '(',
            separated(
                1..,
                preceded(ws, (string_ident, opt('*')).take().map(str::to_owned)),
                (ws, ','),
            ),
            (ws, cut_err(')')),
        )
        .map(StringSet::Patterns),
    ))
    .parse_next(input)
}

fn of_expr(input: &mut Input<'_>) -> ModalResult<Expr> {
    let quantifier = alt((
        keyword("all").value(Quantifier::All),
        keyword("any").value(Quantifier::Any),
        keyword("none").value(Quantifier::None),
        number.map(Quantifier::Count),
    ))
    .parse_next(input)?;
    (ws, keyword("of"), ws).parse_next(input)?;
    let set = cut_err(string_set)
        .context(StrContext::Expected(StrContextValue::Description(
            "'them' or a string set",
        )))
        .parse_next(input)?;
    Ok(Expr::Of { quantifier, set })
}

fn string_ref(input: &mut Input<'_>) -> ModalResult<Expr> {
    let id = string_ident.parse_next(input)?.to_owned();
    if opt(preceded(ws, keyword("at"))).parse_next(input)?.is_some() {
        let offset = cut_err(primary).parse_next(input)?;
        return Ok(Expr::StringAt {
            id,
            offset: Box::new(offset),
        });
    }
    if opt(preceded(ws, keyword("in"))).parse_next(input)?.is_some() {
        let (start, end) = cut_err(delimited(
            (ws, '('),
            separated_pair(primary, (ws, ".."), primary),
            (ws, ')'),
        ))
        .context(StrContext::Expected(StrContextValue::Description(
            "range '(start..end)'",
        )))
        .parse_next(input)?;
        return Ok(Expr::StringIn {
            id,
            start: Box::new(start),
            end: Box::new(end),
        });
    }
    Ok(Expr::StringMatch(id))
}

fn string_count(input: &mut Input<'_>) -> ModalResult<Expr> {
    let name = preceded('#', take_while(1.., is_ident_char)).parse_next(input)?;
    Ok(Expr::StringCount(format!("${name}")))
}

fn identifier(input: &mut Input<'_>) -> ModalResult<Expr> {
    ident
        .verify(|name: &str| !RESERVED.contains(&name))
        .map(|name: &str| Expr::Identifier(name.to_owned()))
        .parse_next(input)
}

fn primary(input: &mut Input<'_>) -> ModalResult<Expr> {
    ws.parse_next(input)?;
    alt((
        preceded('(', nested("condition", terminated(expr, (ws, cut_err(')'))))),
        of_expr,
        keyword("true").value(Expr::Bool(true)),
        keyword("false").value(Expr::Bool(false)),
        keyword("filesize").value(Expr::Filesize),
        string_ref,
        string_count,
        number.map(Expr::Int),
        quoted_string.map(Expr::Str),
        identifier,
    ))
    .context(StrContext::Expected(StrContextValue::Description(
        "expression",
    )))
    .parse_next(input)
}

fn comparison(input: &mut Input<'_>) -> ModalResult<Expr> {
    let left = primary(input)?;
    match opt(preceded(ws, compare_op)).parse_next(input)? {
        Some(op) => {
            let right = cut_err(primary).parse_next(input)?;
            Ok(Expr::Compare {
                left: Box::new(left),
                op,
                right: Box::new(right),
            })
        }
        None => Ok(left),
    }
}

fn unary(input: &mut Input<'_>) -> ModalResult<Expr> {
    ws.parse_next(input)?;
    if opt(keyword("not")).parse_next(input)?.is_some() {
        let inner = cut_err(nested("condition", unary)).parse_next(input)?;
        Ok(Expr::Not(Box::new(inner)))
    } else {
        comparison(input)
    }
}

/// `first` alone, or every operand of a flat `and`/`or` chain.
fn chain(first: Expr, rest: Vec<Expr>, join: fn(Vec<Expr>) -> Expr) -> Expr {
    if rest.is_empty() {
        return first;
    }
    let mut operands = Vec::with_capacity(rest.len() + 1);
    operands.push(first);
    operands.extend(rest);
    join(operands)
}

fn and_expr(input: &mut Input<'_>) -> ModalResult<Expr> {
    let first = unary(input)?;
    let rest: Vec<Expr> =
        repeat(0.., preceded((ws, keyword("and")), cut_err(unary))).parse_next(input)?;
    Ok(chain(first, rest, Expr::And))
}

fn or_expr(input: &mut Input<'_>) -> ModalResult<Expr> {
    let first = and_expr(input)?;
    let rest: Vec<Expr> =
        repeat(0.., preceded((ws, keyword("or")), cut_err(and_expr))).parse_next(input)?;
    Ok(chain(first, rest, Expr::Or))
}

fn expr(input: &mut Input<'_>) -> ModalResult<Expr> {
    ws.parse_next(input)?;
    or_expr(input)
}

// -- Rules ------------------------------------------------------------------

fn rule_def(input: &mut Input<'_>) -> ModalResult<RuleDef> {
    ws.parse_next(input)?;
    let at = input.len();

    let mut private = false;
    let mut global = false;
    loop {
        if opt(terminated(keyword("private"), ws)).parse_next(input)?.is_some() {
            private = true;
        } else if opt(terminated(keyword("global"), ws)).parse_next(input)?.is_some() {
            global = true;
        } else {
            break;
        }
    }

    keyword("rule").parse_next(input)?;
    ws.parse_next(input)?;
    let name = cut_err(ident.verify(|name: &str| !RESERVED.contains(&name)))
        .context(StrContext::Expected(StrContextValue::Description(
            "rule identifier",
        )))
        .parse_next(input)?;

    ws.parse_next(input)?;
    let tags: Option<Vec<&str>> =
        opt(preceded(':', cut_err(repeat(1.., preceded(ws, ident))))).parse_next(input)?;

    ws.parse_next(input)?;
    cut_err('{')
        .context(StrContext::Expected(StrContextValue::CharLiteral('{')))
        .parse_next(input)?;

    let metas: Option<Vec<(String, MetaValue)>> =
        opt(preceded((ws, keyword("meta"), ws, ':'), repeat(0.., meta_entry)))
            .parse_next(input)?;

    let strings: Option<Vec<StringDef>> = opt(preceded(
        (ws, keyword("strings"), ws, ':'),
        cut_err(repeat(1.., string_def)),
    ))
    .parse_next(input)?;

    (ws, cut_err((keyword("condition"), ws, ':')))
        .context(StrContext::Expected(StrContextValue::Description(
            "'condition:' section",
        )))
        .parse_next(input)?;
    let condition = cut_err(expr).parse_next(input)?;
    (ws, cut_err('}'))
        .context(StrContext::Expected(StrContextValue::CharLiteral('}')))
        .parse_next(input)?;

    Ok(RuleDef {
        name: name.to_owned(),
        private,
        global,
        tags: tags
            .unwrap_or_default()
            .into_iter()
            .map(str::to_owned)
            .collect(),
        metas: metas.unwrap_or_default(),
        strings: strings.unwrap_or_default(),
        condition,
        line: at,
    })
}

fn include(input: &mut Input<'_>) -> ModalResult<Item> {
    ws.parse_next(input)?;
    let at = input.len();
    keyword("include").parse_next(input)?;
    ws.parse_next(input)?;
    let path = cut_err(quoted_string)
        .context(StrContext::Expected(StrContextValue::Description(
            "quoted include path",
        )))
        .parse_next(input)?;
    Ok(Item::Include { path, line: at })
}

// -- Top-level parser -------------------------------------------------------

pub(super) fn source_file(input: &mut Input<'_>) -> ModalResult<ParsedSource> {
    let items: Vec<Item> =
        repeat(0.., alt((include, rule_def.map(Item::Rule)))).parse_next(input)?;
    ws.parse_next(input)?;
    Ok(ParsedSource { items })
}

#[cfg(test)]
mod tests {
    use crate::parse::parse;

    use super::*;

    fn condition_of(src: &str) -> Expr {
        let parsed = parse(src).unwrap();
        let condition = parsed.rules().next().unwrap().condition.clone();
        condition
    }

    #[test]
    fn parse_minimal_rule() {
        let parsed = parse("rule test { condition: true }").unwrap();
        let rule = parsed.rules().next().unwrap();
        assert_eq!(rule.name, "test");
        assert_eq!(rule.condition, Expr::Bool(true));
        assert!(rule.tags.is_empty());
        assert_eq!(rule.line, 1);
    }

    #[test]
    fn parse_tags_meta_strings() {
        let src = r#"rule t2 : tag2 x y {
            meta:
                author = "Author Two"
                version = 3
                draft = false
            strings:
                $b = "def" nocase wide
            condition:
                $b
        }"#;
        let parsed = parse(src).unwrap();
        let rule = parsed.rules().next().unwrap();
        assert_eq!(rule.tags, vec!["tag2", "x", "y"]);
        assert_eq!(
            rule.metas,
            vec![
                ("author".to_owned(), MetaValue::Text("Author Two".into())),
                ("version".to_owned(), MetaValue::Integer(3)),
                ("draft".to_owned(), MetaValue::Boolean(false)),
            ]
        );
        assert_eq!(rule.strings.len(), 1);
        assert_eq!(rule.strings[0].name, "$b");
        assert_eq!(rule.strings[0].modifiers, vec![Modifier::Nocase, Modifier::Wide]);
        assert_eq!(rule.strings[0].line, 7);
    }

    #[test]
    fn parse_hex_string() {
        let src = "rule h {
            strings: $h = { 4D 5A ?? 9? [2-4] ( 00 | 01 02 ) [3] [-] }
            condition: $h
        }";
        let parsed = parse(src).unwrap();
        let rule = parsed.rules().next().unwrap();
        let Pattern::Hex(tokens) = &rule.strings[0].pattern else {
            panic!("expected hex pattern");
        };
        assert_eq!(tokens.len(), 8);
        assert_eq!(tokens[2], HexToken::Byte { value: 0, mask: 0 });
        assert_eq!(tokens[3], HexToken::Byte { value: 0x90, mask: 0xF0 });
        assert_eq!(tokens[4], HexToken::Jump { min: 2, max: Some(4) });
        assert_eq!(tokens[6], HexToken::Jump { min: 3, max: Some(3) });
        assert_eq!(tokens[7], HexToken::Jump { min: 0, max: None });
    }

    #[test]
    fn parse_regex_with_flags() {
        let src = r"rule r { strings: $re = /ab\/c[0-9]+/is condition: $re }";
        let parsed = parse(src).unwrap();
        let string = &parsed.rules().next().unwrap().strings[0];
        assert_eq!(string.pattern, Pattern::Regex("ab/c[0-9]+".into()));
        assert_eq!(string.modifiers, vec![Modifier::Nocase, Modifier::DotAll]);
    }

    #[test]
    fn parse_text_escapes() {
        let src = r#"rule e { strings: $a = "a\"b\\c\x41\n" condition: $a }"#;
        let parsed = parse(src).unwrap();
        let string = &parsed.rules().next().unwrap().strings[0];
        assert_eq!(string.pattern, Pattern::Text(b"a\"b\\cA\n".to_vec()));
    }

    #[test]
    fn parse_precedence_and_before_or() {
        let cond = condition_of("rule r { condition: a or b and c }");
        match cond {
            Expr::Or(operands) => {
                assert_eq!(operands[0], Expr::Identifier("a".into()));
                assert!(matches!(&operands[1], Expr::And(inner) if inner.len() == 2));
            }
            other => panic!("expected Or, got {other:?}"),
        }
    }

    #[test]
    fn parse_not_binds_tighter_than_and() {
        let cond = condition_of("rule r { condition: not a and b }");
        assert!(matches!(cond, Expr::And(ref operands) if matches!(operands[0], Expr::Not(_))));
    }

    #[test]
    fn parse_of_expressions() {
        assert_eq!(
            condition_of("rule r { strings: $a = \"x\" condition: any of them }"),
            Expr::Of {
                quantifier: Quantifier::Any,
                set: StringSet::Them,
            }
        );
        assert_eq!(
            condition_of("rule r { strings: $a = \"x\" condition: 2 of ($a, $b*) }"),
            Expr::Of {
                quantifier: Quantifier::Count(2),
                set: StringSet::Patterns(vec!["$a".into(), "$b*".into()]),
            }
        );
    }

    #[test]
    fn parse_at_in_count_filesize() {
        let cond = condition_of(
            "rule r {
                strings: $a = \"x\"
                condition: $a at 0 and $a in (0..filesize) and #a >= 2 and filesize < 1KB
            }",
        );
        assert_eq!(
            cond.to_string(),
            "(($a at 0) and ($a in (0..filesize)) and (#a >= 2) and (filesize < 1024))"
        );
    }

    #[test]
    fn parse_hex_number() {
        let cond = condition_of("rule r { condition: filesize == 0x10 }");
        assert_eq!(
            cond,
            Expr::Compare {
                left: Box::new(Expr::Filesize),
                op: CompareOp::Eq,
                right: Box::new(Expr::Int(16)),
            }
        );
    }

    #[test]
    fn parse_private_global_and_include() {
        let src = "include \"common.yar\"\nprivate global rule g { condition: true }";
        let parsed = parse(src).unwrap();
        assert_eq!(
            parsed.items[0],
            Item::Include {
                path: "common.yar".into(),
                line: 1,
            }
        );
        let rule = parsed.rules().next().unwrap();
        assert!(rule.private);
        assert!(rule.global);
        assert_eq!(rule.line, 2);
    }

    #[test]
    fn parse_comments_ignored() {
        let src = "// header\n/* block\ncomment */ rule r { condition: /* inline */ true }";
        assert_eq!(parse(src).unwrap().rules().count(), 1);
    }

    #[test]
    fn keyword_prefix_is_an_identifier() {
        let cond = condition_of("rule r { condition: notable or android }");
        assert_eq!(
            cond,
            Expr::Or(vec![
                Expr::Identifier("notable".into()),
                Expr::Identifier("android".into()),
            ])
        );
    }
}
