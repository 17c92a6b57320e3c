use serde::Serialize;
use snafu::Snafu;

const ADDRESS_PLACEHOLDER: &str = "address";

#[derive(Debug, Snafu, PartialEq, Eq)]
pub enum TemplateError {
    #[snafu(display("unknown placeholder {{{name}}} at byte {offset}"))]
    UnknownPlaceholder { name: String, offset: usize },

    #[snafu(display("unmatched '{brace}' at byte {offset}; literal braces must be doubled"))]
    UnbalancedBrace { brace: char, offset: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Address,
}

/// GraphQL query text with an `{address}` placeholder.
///
/// Uses brace-format syntax: `{{` and `}}` render as literal braces, so the
/// query's own selection sets are written doubled in the template file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryTemplate {
    segments: Vec<Segment>,
}

impl QueryTemplate {
    pub fn parse(raw: &str) -> Result<Self, TemplateError> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = raw.char_indices().peekable();

        while let Some((offset, c)) = chars.next() {
            match c {
                '{' => {
                    if matches!(chars.peek(), Some((_, '{'))) {
                        chars.next();
                        literal.push('{');
                        continue;
                    }
                    let mut name = String::new();
                    let mut closed = false;
                    for (_, inner) in chars.by_ref() {
                        if inner == '}' {
                            closed = true;
                            break;
                        }
                        name.push(inner);
                    }
                    if !closed {
                        return Err(TemplateError::UnbalancedBrace { brace: '{', offset });
                    }
                    if name != ADDRESS_PLACEHOLDER {
                        return Err(TemplateError::UnknownPlaceholder { name, offset });
                    }
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Address);
                }
                '}' => {
                    if matches!(chars.peek(), Some((_, '}'))) {
                        chars.next();
                        literal.push('}');
                    } else {
                        return Err(TemplateError::UnbalancedBrace { brace: '}', offset });
                    }
                }
                other => literal.push(other),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self { segments })
    }

    /// Number of `{address}` occurrences.
    pub fn placeholder_count(&self) -> usize {
        self.segments
            .iter()
            .filter(|s| matches!(s, Segment::Address))
            .count()
    }

    pub fn render(&self, address: &str) -> String {
        self.segments
            .iter()
            .map(|segment| match segment {
                Segment::Literal(text) => text.as_str(),
                Segment::Address => address,
            })
            .collect()
    }

    pub fn request_for(&self, address: &str) -> GraphqlRequest {
        GraphqlRequest {
            query: self.render(address),
        }
    }
}

/// JSON body POSTed to the endpoint.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct GraphqlRequest {
    pub query: String,
}
