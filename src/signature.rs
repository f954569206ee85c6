//! Recursive-descent parser for JVM type signatures and method signatures,
//! covering both plain descriptors (`Ljava/lang/String;`, `(I)V`) and the
//! generic forms emitted into `Signature` attributes. The parsed trees are
//! only walked to collect referenced class names.

use std::collections::BTreeSet;

use thiserror::Error;

/// Malformed type or method signature.
#[derive(Debug, Error)]
#[error("invalid type signature {signature:?} at offset {position}: {message}")]
pub(crate) struct SignatureError {
    signature: String,
    position: usize,
    message: &'static str,
}

/// A field type signature or single type use.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum TypeSignature {
    /// Primitive descriptor character (`B`, `C`, `D`, `F`, `I`, `J`, `S`,
    /// `Z`; `V` only as a method return type).
    Base(char),
    Array(Box<TypeSignature>),
    TypeVariable(String),
    ClassRef {
        /// Dot-separated class name; inner-class suffixes joined with `$`.
        class_name: String,
        type_arguments: Vec<TypeArgument>,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum TypeArgument {
    /// `*`
    Any,
    /// `+` bound
    Extends(TypeSignature),
    /// `-` bound
    Super(TypeSignature),
    Exact(TypeSignature),
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct TypeParameter {
    pub(crate) name: String,
    pub(crate) class_bound: Option<TypeSignature>,
    pub(crate) interface_bounds: Vec<TypeSignature>,
}

/// A method descriptor or generic method signature.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct MethodTypeSignature {
    pub(crate) type_parameters: Vec<TypeParameter>,
    pub(crate) parameter_types: Vec<TypeSignature>,
    pub(crate) return_type: TypeSignature,
    pub(crate) throws: Vec<TypeSignature>,
}

impl TypeSignature {
    /// Parse a complete field type signature; trailing input is an error.
    pub(crate) fn parse(signature: &str) -> Result<Self, SignatureError> {
        let mut parser = Parser::new(signature);
        let parsed = parser.parse_type()?;
        parser.expect_end()?;
        Ok(parsed)
    }

    /// Add every class named anywhere in this signature to `out`.
    pub(crate) fn find_referenced_class_names(&self, out: &mut BTreeSet<String>) {
        match self {
            TypeSignature::Base(_) | TypeSignature::TypeVariable(_) => {}
            TypeSignature::Array(elem) => elem.find_referenced_class_names(out),
            TypeSignature::ClassRef {
                class_name,
                type_arguments,
            } => {
                out.insert(class_name.clone());
                for argument in type_arguments {
                    match argument {
                        TypeArgument::Any => {}
                        TypeArgument::Extends(sig)
                        | TypeArgument::Super(sig)
                        | TypeArgument::Exact(sig) => sig.find_referenced_class_names(out),
                    }
                }
            }
        }
    }
}

impl MethodTypeSignature {
    /// Parse a complete method signature; trailing input is an error.
    pub(crate) fn parse(signature: &str) -> Result<Self, SignatureError> {
        let mut parser = Parser::new(signature);
        let parsed = parser.parse_method()?;
        parser.expect_end()?;
        Ok(parsed)
    }

    /// Add every class named anywhere in this signature to `out`.
    pub(crate) fn find_referenced_class_names(&self, out: &mut BTreeSet<String>) {
        for parameter in &self.type_parameters {
            if let Some(bound) = &parameter.class_bound {
                bound.find_referenced_class_names(out);
            }
            for bound in &parameter.interface_bounds {
                bound.find_referenced_class_names(out);
            }
        }
        for parameter in &self.parameter_types {
            parameter.find_referenced_class_names(out);
        }
        self.return_type.find_referenced_class_names(out);
        for thrown in &self.throws {
            thrown.find_referenced_class_names(out);
        }
    }
}

struct Parser<'a> {
    input: &'a str,
    rest: &'a str,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, rest: input }
    }

    fn error(&self, message: &'static str) -> SignatureError {
        SignatureError {
            signature: self.input.to_string(),
            position: self.input.len() - self.rest.len(),
            message,
        }
    }

    fn peek(&self) -> Option<char> {
        self.rest.chars().next()
    }

    fn bump(&mut self) -> Result<char, SignatureError> {
        let c = self.peek().ok_or_else(|| self.error("unexpected end"))?;
        self.rest = &self.rest[c.len_utf8()..];
        Ok(c)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.rest = &self.rest[expected.len_utf8()..];
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: char) -> Result<(), SignatureError> {
        if self.eat(expected) {
            Ok(())
        } else {
            Err(self.error("unexpected character"))
        }
    }

    fn expect_end(&self) -> Result<(), SignatureError> {
        if self.rest.is_empty() {
            Ok(())
        } else {
            Err(self.error("trailing characters"))
        }
    }

    fn parse_type(&mut self) -> Result<TypeSignature, SignatureError> {
        match self.peek() {
            Some('B' | 'C' | 'D' | 'F' | 'I' | 'J' | 'S' | 'Z') => {
                Ok(TypeSignature::Base(self.bump()?))
            }
            Some('[') => {
                self.bump()?;
                Ok(TypeSignature::Array(Box::new(self.parse_type()?)))
            }
            Some('T') => {
                self.bump()?;
                let mut name = String::new();
                loop {
                    match self.bump()? {
                        ';' => break,
                        c => name.push(c),
                    }
                }
                if name.is_empty() {
                    return Err(self.error("empty type variable name"));
                }
                Ok(TypeSignature::TypeVariable(name))
            }
            Some('L') => self.parse_class_ref(),
            _ => Err(self.error("expected a type signature")),
        }
    }

    fn parse_class_ref(&mut self) -> Result<TypeSignature, SignatureError> {
        self.expect('L')?;
        let mut class_name = String::new();
        let mut type_arguments = Vec::new();
        loop {
            match self.bump()? {
                ';' => break,
                '<' => {
                    while !self.eat('>') {
                        type_arguments.push(self.parse_type_argument()?);
                    }
                }
                // Inner-class suffix separator.
                '.' => class_name.push('$'),
                '/' => class_name.push('.'),
                c => class_name.push(c),
            }
        }
        if class_name.is_empty() {
            return Err(self.error("empty class name"));
        }
        Ok(TypeSignature::ClassRef {
            class_name,
            type_arguments,
        })
    }

    fn parse_type_argument(&mut self) -> Result<TypeArgument, SignatureError> {
        match self.peek() {
            Some('*') => {
                self.bump()?;
                Ok(TypeArgument::Any)
            }
            Some('+') => {
                self.bump()?;
                Ok(TypeArgument::Extends(self.parse_type()?))
            }
            Some('-') => {
                self.bump()?;
                Ok(TypeArgument::Super(self.parse_type()?))
            }
            _ => Ok(TypeArgument::Exact(self.parse_type()?)),
        }
    }

    fn parse_method(&mut self) -> Result<MethodTypeSignature, SignatureError> {
        let mut type_parameters = Vec::new();
        if self.eat('<') {
            while !self.eat('>') {
                type_parameters.push(self.parse_type_parameter()?);
            }
        }
        self.expect('(')?;
        let mut parameter_types = Vec::new();
        while !self.eat(')') {
            parameter_types.push(self.parse_type()?);
        }
        let return_type = if self.eat('V') {
            TypeSignature::Base('V')
        } else {
            self.parse_type()?
        };
        let mut throws = Vec::new();
        while self.eat('^') {
            throws.push(self.parse_type()?);
        }
        Ok(MethodTypeSignature {
            type_parameters,
            parameter_types,
            return_type,
            throws,
        })
    }

    fn parse_type_parameter(&mut self) -> Result<TypeParameter, SignatureError> {
        let mut name = String::new();
        loop {
            match self.bump()? {
                ':' => break,
                c => name.push(c),
            }
        }
        if name.is_empty() {
            return Err(self.error("empty type parameter name"));
        }
        // The class bound may be empty when only interface bounds follow.
        let class_bound = match self.peek() {
            Some(':') => None,
            _ => Some(self.parse_type()?),
        };
        let mut interface_bounds = Vec::new();
        while self.eat(':') {
            interface_bounds.push(self.parse_type()?);
        }
        Ok(TypeParameter {
            name,
            class_bound,
            interface_bounds,
        })
    }
}
